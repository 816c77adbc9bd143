//! Command processor.
//!
//! Each node runs exactly one `CommandProcessor`. It receives the delivered command frames in
//! order and applies them to the node's `GroupRegistry` one at a time, so group mutations never
//! run concurrently on a node.
//!
//! # Failure Handling
//!
//! A command whose execution violates an invariant has not been applied. Applying later commands
//! on top of that would let this node diverge from the cluster, so the processor logs the
//! violation, stops, and returns `StreamingError::Fatal` from its task.

use std::sync::Arc;

use bytes::Bytes;
use corelib::NodeAddress;
use membership::GroupRegistry;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::codec;
use crate::error::{Result, StreamingError};

/// Summary of a processor that stopped cleanly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorReport {
    pub node: NodeAddress,
    /// Number of commands applied.
    pub executed: u64,
    /// Sequence number of the last applied command.
    pub last_sequence: Option<u64>,
}

pub struct CommandProcessor {
    /// Address of the node this processor runs on.
    node: NodeAddress,
    registry: Arc<GroupRegistry>,
    /// Delivered command frames.
    inbound: mpsc::UnboundedReceiver<Bytes>,
    /// Optional channel used for triggering graceful shutdown.
    shutdown: Option<broadcast::Receiver<()>>,
    executed: u64,
    last_sequence: Option<u64>,
}

impl CommandProcessor {
    pub fn new(
        node: NodeAddress,
        registry: Arc<GroupRegistry>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            node,
            registry,
            inbound,
            shutdown: None,
            executed: 0,
            last_sequence: None,
        }
    }

    /// Stop at the next shutdown signal instead of waiting for the stream to close.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn spawn(self) -> JoinHandle<Result<ProcessorReport>> {
        tokio::spawn(self.run())
    }

    /// Apply delivered commands until the stream closes or shutdown is signalled.
    pub async fn run(mut self) -> Result<ProcessorReport> {
        tracing::debug!(node = %self.node, "command processor started");

        loop {
            let next = match self.shutdown.as_mut() {
                Some(shutdown) => tokio::select! {
                    next = self.inbound.recv() => next,
                    _ = shutdown.recv() => break,
                },
                None => self.inbound.recv().await,
            };
            let Some(bytes) = next else {
                break;
            };
            self.apply(bytes)?;
        }

        tracing::debug!(node = %self.node, executed = self.executed, "command processor stopped");
        Ok(ProcessorReport {
            node: self.node,
            executed: self.executed,
            last_sequence: self.last_sequence,
        })
    }

    fn apply(&mut self, bytes: Bytes) -> Result<()> {
        let frame = codec::decode_command(bytes)?;
        if let Some(last) = self.last_sequence {
            if frame.sequence <= last {
                return Err(StreamingError::Frame(format!(
                    "command #{} delivered after #{}",
                    frame.sequence, last
                )));
            }
        }

        let name = frame.command.name();
        match membership::execute(&self.registry, &frame.command) {
            Ok(()) => {
                metrics::counter!("cachegroup_commands_executed_total", "command" => name)
                    .increment(1);
                tracing::trace!(
                    node = %self.node,
                    sequence = frame.sequence,
                    command = name,
                    "command applied"
                );
                self.executed += 1;
                self.last_sequence = Some(frame.sequence);
                Ok(())
            }
            Err(source) => {
                metrics::counter!("cachegroup_command_failures_total", "command" => name)
                    .increment(1);
                tracing::error!(
                    node = %self.node,
                    sequence = frame.sequence,
                    command = name,
                    error = %source,
                    "invariant violation, halting command processing"
                );
                Err(StreamingError::Fatal {
                    sequence: frame.sequence,
                    source,
                })
            }
        }
    }
}
