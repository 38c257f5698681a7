//! What this peer knows of every origin's rumors

use std::collections::HashMap;

use parking_lot::Mutex;

use partage_core::NodeAddr;
use partage_wire::{Message, Rumor, StatusMap};

/// Per-origin rumor history; entry `i` holds sequence `i + 1`
#[derive(Debug)]
pub struct PeerView {
    me: NodeAddr,
    origins: Mutex<HashMap<NodeAddr, Vec<Rumor>>>,
}

impl PeerView {
    pub fn new(me: NodeAddr) -> Self {
        PeerView {
            me,
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Number the next local broadcast and record it
    pub fn next_own_rumor(&self, msg: Message) -> Rumor {
        let mut origins = self.origins.lock();
        let history = origins.entry(self.me.clone()).or_default();
        let rumor = Rumor {
            origin: self.me.clone(),
            sequence: history.len() as u64 + 1,
            msg,
        };
        history.push(rumor.clone());
        rumor
    }

    /// Record `rumor` if it is the next one expected from its origin
    pub fn try_accept(&self, rumor: &Rumor) -> bool {
        let mut origins = self.origins.lock();
        let history = origins.entry(rumor.origin.clone()).or_default();
        if rumor.sequence == history.len() as u64 + 1 {
            history.push(rumor.clone());
            true
        } else {
            false
        }
    }

    /// Highest contiguous sequence seen from `origin`
    pub fn last_seq(&self, origin: &NodeAddr) -> u64 {
        self.origins
            .lock()
            .get(origin)
            .map_or(0, |h| h.len() as u64)
    }

    /// Every rumor recorded from `origin`, oldest first
    pub fn rumors_from(&self, origin: &NodeAddr) -> Vec<Rumor> {
        self.origins.lock().get(origin).cloned().unwrap_or_default()
    }

    /// Snapshot of every known origin's sequence
    pub fn status(&self) -> StatusMap {
        self.origins
            .lock()
            .iter()
            .filter(|(_, history)| !history.is_empty())
            .map(|(origin, history)| (origin.clone(), history.len() as u64))
            .collect()
    }

    /// Compare with `remote`'s status.
    ///
    /// Returns whether the remote knows something this peer does not, and the
    /// rumors the remote is missing, oldest first per origin. Rumors the
    /// remote originated itself are never sent back to it.
    pub fn compare(&self, remote: &NodeAddr, remote_status: &StatusMap) -> (bool, Vec<Rumor>) {
        let origins = self.origins.lock();

        let remote_news = remote_status.iter().any(|(origin, &seq)| {
            seq > origins.get(origin).map_or(0, |h| h.len() as u64)
        });

        let mut origin_keys: Vec<&NodeAddr> = origins.keys().collect();
        origin_keys.sort();

        let mut local_news = Vec::new();
        for origin in origin_keys {
            if origin == remote {
                continue;
            }
            let history = &origins[origin];
            let known = remote_status.get(origin).copied().unwrap_or(0) as usize;
            if history.len() > known {
                local_news.extend(history[known..].iter().cloned());
            }
        }

        (remote_news, local_news)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rumor(origin: &str, sequence: u64) -> Rumor {
        Rumor {
            origin: NodeAddr::from(origin),
            sequence,
            msg: Message::Empty,
        }
    }

    #[test]
    fn test_accepts_only_next_sequence() {
        let view = PeerView::new(NodeAddr::from("me"));
        assert!(!view.try_accept(&rumor("a", 2)));
        assert!(view.try_accept(&rumor("a", 1)));
        assert!(!view.try_accept(&rumor("a", 1)));
        assert!(view.try_accept(&rumor("a", 2)));
        assert_eq!(view.last_seq(&NodeAddr::from("a")), 2);
    }

    #[test]
    fn test_own_rumors_are_numbered_from_one() {
        let view = PeerView::new(NodeAddr::from("me"));
        assert_eq!(view.next_own_rumor(Message::Empty).sequence, 1);
        assert_eq!(view.next_own_rumor(Message::Empty).sequence, 2);
        assert_eq!(view.status().get(&NodeAddr::from("me")), Some(&2));
    }

    #[test]
    fn test_rumors_from_keeps_history_in_order() {
        let view = PeerView::new(NodeAddr::from("me"));
        view.next_own_rumor(Message::Empty);
        view.next_own_rumor(Message::custom("note", vec![1]));
        let own = view.rumors_from(&NodeAddr::from("me"));
        assert_eq!(own.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(own[1].msg, Message::custom("note", vec![1]));
        assert!(view.rumors_from(&NodeAddr::from("a")).is_empty());
    }

    #[test]
    fn test_compare_sends_missing_range() {
        let view = PeerView::new(NodeAddr::from("me"));
        for seq in 1..=4 {
            view.try_accept(&rumor("a", seq));
        }
        let mut remote = StatusMap::new();
        remote.insert(NodeAddr::from("a"), 2);

        let (remote_news, local_news) = view.compare(&NodeAddr::from("r"), &remote);
        assert!(!remote_news);
        let seqs: Vec<u64> = local_news.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn test_compare_skips_remote_own_rumors() {
        let view = PeerView::new(NodeAddr::from("me"));
        view.try_accept(&rumor("r", 1));
        let (remote_news, local_news) = view.compare(&NodeAddr::from("r"), &StatusMap::new());
        assert!(!remote_news);
        assert!(local_news.is_empty());
    }

    #[test]
    fn test_compare_detects_remote_news() {
        let view = PeerView::new(NodeAddr::from("me"));
        let mut remote = StatusMap::new();
        remote.insert(NodeAddr::from("b"), 1);
        let (remote_news, _) = view.compare(&NodeAddr::from("r"), &remote);
        assert!(remote_news);
    }

    proptest! {
        #[test]
        fn test_sequences_stay_contiguous(seqs in proptest::collection::vec(1u64..8, 0..64)) {
            let view = PeerView::new(NodeAddr::from("me"));
            let mut expected = 0;
            for seq in seqs {
                let accepted = view.try_accept(&rumor("a", seq));
                prop_assert_eq!(accepted, seq == expected + 1);
                if accepted {
                    expected += 1;
                }
            }
            prop_assert_eq!(view.last_seq(&NodeAddr::from("a")), expected);
        }
    }
}
