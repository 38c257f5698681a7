//! Partage consensus - one Paxos log per topic
//!
//! Each topic runs an independent [`PaxosInstance`]: a reactive acceptor, a
//! proposer state machine and a per-topic [`Clock`]. Once a threshold of
//! peers accepted a value, peers exchange TLC messages; a step is committed
//! and appended to the topic's hash chain when a threshold of TLCs for it
//! arrived. The [`ConsensusLayer`] keeps the registry of topics and routes
//! consensus messages to them.

pub mod acceptor;
pub mod clock;
pub mod hooks;
pub mod instance;
pub mod layer;
pub mod proposer;
pub mod quorum;
pub mod transport;

pub use acceptor::*;
pub use clock::*;
pub use hooks::*;
pub use instance::*;
pub use layer::*;
pub use proposer::*;
pub use quorum::*;
pub use transport::*;
