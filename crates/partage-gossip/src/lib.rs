//! Partage gossip - eventually consistent broadcast
//!
//! A broadcast becomes a [`Rumor`](partage_wire::Rumor) numbered by its
//! origin. Rumors travel to one random neighbor at a time and are relayed on
//! until they stop being news. Periodic status exchange (anti-entropy) fills
//! whatever mongering missed, and every peer processes each origin's rumors
//! strictly in sequence order.

pub mod handlers;
pub mod layer;
pub mod sequencer;
pub mod view;

pub use layer::*;
pub use sequencer::*;
pub use view::*;
