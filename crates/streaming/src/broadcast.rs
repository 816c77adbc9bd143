//! Total-order command broadcast.
//!
//! Every node posts membership commands through a `CommandBroadcaster`. Delivery guarantees:
//! - Every subscribed processor receives every command posted after it subscribed
//! - All processors receive commands in the same order
//! - Each delivery carries the sequence number of the command in that order

use std::sync::Arc;

use bytes::Bytes;
use membership::Command;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::codec::{self, CommandFrame};
use crate::error::{Result, StreamingError};

/// Posts replicated commands to every node.
pub trait CommandBroadcaster: Send + Sync {
    /// Publish a command. Returns its sequence number in the total order.
    fn post(&self, command: Command) -> Result<u64>;
}

impl<B: CommandBroadcaster + ?Sized> CommandBroadcaster for Arc<B> {
    fn post(&self, command: Command) -> Result<u64> {
        (**self).post(command)
    }
}

/// In-process broadcaster feeding the command processors of simulated nodes.
///
/// Posting holds one lock for sequencing and fan-out, which is what makes the order total.
pub struct LocalBroadcast {
    state: Mutex<BroadcastState>,
}

struct BroadcastState {
    next_sequence: u64,
    closed: bool,
    subscribers: Vec<mpsc::UnboundedSender<Bytes>>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BroadcastState {
                next_sequence: 0,
                closed: false,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Open a delivery channel for one node.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Number of open delivery channels.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Close every delivery channel. Processors drain what was posted and then stop.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
        tracing::debug!(posted = state.next_sequence, "command broadcast closed");
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBroadcaster for LocalBroadcast {
    fn post(&self, command: Command) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StreamingError::Closed);
        }

        let sequence = state.next_sequence;
        let name = command.name();
        let bytes = codec::encode_command(&CommandFrame { sequence, command })?;
        state.subscribers.retain(|subscriber| subscriber.send(bytes.clone()).is_ok());
        state.next_sequence += 1;

        tracing::trace!(
            sequence,
            command = name,
            receivers = state.subscribers.len(),
            "command posted"
        );
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::NodeAddress;
    use membership::{JoinGroupMessage, MarkLeavingCommand};

    fn command(address: u128) -> Command {
        JoinGroupMessage::client("orders", NodeAddress(address)).into()
    }

    #[tokio::test]
    async fn test_same_order_for_every_subscriber() {
        let broadcast = LocalBroadcast::new();
        let mut first = broadcast.subscribe();
        let mut second = broadcast.subscribe();

        for address in 1..=3 {
            broadcast.post(command(address)).unwrap();
        }

        for receiver in [&mut first, &mut second] {
            for expected in 0..3u64 {
                let frame = codec::decode_command(receiver.recv().await.unwrap()).unwrap();
                assert_eq!(frame.sequence, expected);
                assert_eq!(frame.command, command(u128::from(expected) + 1));
            }
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_later_commands() {
        let broadcast = LocalBroadcast::new();
        broadcast.post(command(1)).unwrap();

        let mut late = broadcast.subscribe();
        broadcast.post(MarkLeavingCommand { addresses: vec![NodeAddress(1)] }.into()).unwrap();

        let frame = codec::decode_command(late.recv().await.unwrap()).unwrap();
        assert_eq!(frame.sequence, 1);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let broadcast = LocalBroadcast::new();
        let receiver = broadcast.subscribe();
        drop(receiver);
        broadcast.post(command(1)).unwrap();
        assert_eq!(broadcast.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_post_after_close() {
        let broadcast = LocalBroadcast::new();
        let mut receiver = broadcast.subscribe();
        broadcast.post(command(1)).unwrap();
        broadcast.close();

        assert!(matches!(broadcast.post(command(2)), Err(StreamingError::Closed)));
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }
}
