//! Partage rendezvous
//!
//! Network handlers run on their own tasks and cannot hand replies straight
//! to the code waiting for them. A [`ResponseBroker`] sits in between: handlers
//! [`dispatch`](ResponseBroker::dispatch) values under a correlation id, and
//! waiters collect them with a timeout. Replies that arrive before anyone
//! waits are kept in a bounded cache.

pub mod broker;

pub use broker::*;
