//! Typed dispatch table from message kind to handler

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use partage_core::PartageResult;
use partage_wire::{Header, Message, MessageKind};

/// Boxed future returned by handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = PartageResult<()>> + Send>>;

/// Processes one message kind
pub trait MessageHandler: Send + Sync {
    fn handle(&self, msg: Message, header: Header) -> HandlerFuture;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message, Header) -> Fut + Send + Sync,
    Fut: Future<Output = PartageResult<()>> + Send + 'static,
{
    fn handle(&self, msg: Message, header: Header) -> HandlerFuture {
        Box::pin(self(msg, header))
    }
}

/// Dispatch table shared by every layer of a peer
#[derive(Default)]
pub struct MessageRegistry {
    handlers: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        MessageRegistry::default()
    }

    /// Install the handler for `kind`, replacing any previous one
    pub fn register(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.handlers.write().insert(kind, handler);
    }

    pub fn is_registered(&self, kind: &MessageKind) -> bool {
        self.handlers.read().contains_key(kind)
    }

    /// Run the handler for the message's kind; unknown kinds are dropped
    pub async fn process(&self, msg: Message, header: Header) -> PartageResult<()> {
        let kind = msg.kind();
        let handler = self.handlers.read().get(&kind).cloned();
        match handler {
            Some(handler) => handler.handle(msg, header).await,
            None => {
                debug!(kind = %kind, from = %header.source, "no handler registered");
                Ok(())
            }
        }
    }

    /// Drop every handler, releasing whatever they hold
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partage_core::{NodeAddr, PartageError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn header() -> Header {
        Header::direct(NodeAddr::from("a"), NodeAddr::from("b"))
    }

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let registry = MessageRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        registry.register(
            MessageKind::Empty,
            Arc::new(move |_msg: Message, _header: Header| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, PartageError>(())
                }
            }),
        );

        registry.process(Message::Empty, header()).await.unwrap();
        registry
            .process(Message::custom("other", vec![]), header())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let registry = MessageRegistry::new();
        registry.register(
            MessageKind::Custom("bad".into()),
            Arc::new(|_msg: Message, _header: Header| async {
                Err::<(), _>(PartageError::InvalidWireFormat("bad".into()))
            }),
        );
        assert!(registry
            .process(Message::custom("bad", vec![]), header())
            .await
            .is_err());
    }

    #[test]
    fn test_clear() {
        let registry = MessageRegistry::new();
        registry.register(
            MessageKind::Empty,
            Arc::new(|_msg: Message, _header: Header| async { Ok::<_, PartageError>(()) }),
        );
        assert!(registry.is_registered(&MessageKind::Empty));
        registry.clear();
        assert!(!registry.is_registered(&MessageKind::Empty));
    }
}
