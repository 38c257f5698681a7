//! Environment overrides for [`PeerConfig`]
//!
//! Every field can be set through a `PARTAGE_*` variable. Durations use
//! humantime syntax (`250ms`, `2s`, `1m 30s`).

use std::str::FromStr;
use std::time::Duration;

use partage_core::{PartageError, PartageResult, PeerConfig};

pub const ENV_TOTAL_PEERS: &str = "PARTAGE_TOTAL_PEERS";
pub const ENV_PAXOS_ID: &str = "PARTAGE_PAXOS_ID";
pub const ENV_PROPOSER_RETRY: &str = "PARTAGE_PROPOSER_RETRY";
pub const ENV_ANTI_ENTROPY_INTERVAL: &str = "PARTAGE_ANTI_ENTROPY_INTERVAL";
pub const ENV_HEARTBEAT_INTERVAL: &str = "PARTAGE_HEARTBEAT_INTERVAL";
pub const ENV_ACK_TIMEOUT: &str = "PARTAGE_ACK_TIMEOUT";
pub const ENV_CONTINUE_MONGERING: &str = "PARTAGE_CONTINUE_MONGERING";
pub const ENV_COMMIT_TICK_WAITS: &str = "PARTAGE_COMMIT_TICK_WAITS";
pub const ENV_RENDEZVOUS_CACHE: &str = "PARTAGE_RENDEZVOUS_CACHE";
pub const ENV_PACKET_TTL: &str = "PARTAGE_PACKET_TTL";

/// Default configuration overlaid with the process environment
pub fn from_env() -> PartageResult<PeerConfig> {
    apply_env(PeerConfig::default(), |key| std::env::var(key).ok())
}

/// Overlay `config` with the values `lookup` finds, then validate it
pub fn apply_env<F>(mut config: PeerConfig, lookup: F) -> PartageResult<PeerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = number(&lookup, ENV_TOTAL_PEERS)? {
        config.total_peers = v;
    }
    if let Some(v) = number(&lookup, ENV_PAXOS_ID)? {
        config.paxos_id = v;
    }
    if let Some(v) = duration(&lookup, ENV_PROPOSER_RETRY)? {
        config.proposer_retry = v;
    }
    if let Some(v) = duration(&lookup, ENV_ANTI_ENTROPY_INTERVAL)? {
        config.anti_entropy_interval = v;
    }
    if let Some(v) = duration(&lookup, ENV_HEARTBEAT_INTERVAL)? {
        config.heartbeat_interval = v;
    }
    if let Some(v) = duration(&lookup, ENV_ACK_TIMEOUT)? {
        config.ack_timeout = v;
    }
    if let Some(v) = number(&lookup, ENV_CONTINUE_MONGERING)? {
        config.continue_mongering = v;
    }
    if let Some(v) = number(&lookup, ENV_COMMIT_TICK_WAITS)? {
        config.commit_wait.tick_waits = v;
    }
    if let Some(v) = number(&lookup, ENV_RENDEZVOUS_CACHE)? {
        config.rendezvous_cache = v;
    }
    if let Some(v) = number(&lookup, ENV_PACKET_TTL)? {
        config.packet_ttl = v;
    }

    config.validate()?;
    Ok(config)
}

fn number<T, F>(lookup: &F, key: &str) -> PartageResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| PartageError::InvalidConfig(format!("{}={:?}: {}", key, raw, e)))
        })
        .transpose()
}

fn duration<F>(lookup: &F, key: &str) -> PartageResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            humantime::parse_duration(raw.trim())
                .map_err(|e| PartageError::InvalidConfig(format!("{}={:?}: {}", key, raw, e)))
        })
        .transpose()
}
