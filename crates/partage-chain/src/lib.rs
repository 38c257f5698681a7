//! Partage chain: values, blocks and the storage they are persisted in
//!
//! Every consensus topic owns one append-only chain. A block commits one
//! [`PaxosValue`] and links to its predecessor through a SHA-256 hash, so a
//! chain loaded from storage can be verified end to end.

pub mod block;
pub mod chain;
pub mod store;
pub mod value;

pub use block::*;
pub use chain::*;
pub use store::*;
pub use value::*;
