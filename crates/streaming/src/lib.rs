//! Replicated command delivery.
//!
//! This crate carries membership commands from the node that posts them to the command
//! processor of every node:
//! - Length-prefixed bincode frames for commands and registry snapshots
//! - A total-order broadcaster implementing `post(command)`
//! - The single-threaded command processor that applies delivered commands in order

pub mod broadcast;
pub mod codec;
pub mod error;
pub mod processor;

pub use broadcast::{CommandBroadcaster, LocalBroadcast};
pub use codec::CommandFrame;
pub use error::{Result, StreamingError};
pub use processor::{CommandProcessor, ProcessorReport};
