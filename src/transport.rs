//! The consumed datagram transport seam
// (c) 2025 Ross Younger

use derive_more::Constructor;

use crate::protocol::Payload;

/// One encapsulated datagram on the command/telemetry bus.
///
/// The outer bus frames this with its own checksumming and signing; as far
/// as this crate is concerned a message is addressing plus an encoded
/// [`Payload`] buffer.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct TransferMessage {
    /// Sending system id
    pub system_id: u8,
    /// Sending component id
    pub component_id: u8,
    /// Network id constant carried in the outer message (0 by default)
    pub network_id: u8,
    /// Addressed system, 0 for broadcast
    pub target_system: u8,
    /// Addressed component, 0 for broadcast
    pub target_component: u8,
    /// The encoded payload buffer (see [`Payload::encode`])
    pub payload: Vec<u8>,
}

impl TransferMessage {
    /// Decodes the embedded payload.
    ///
    /// # Errors
    /// Propagates [`Payload::decode`] failures.
    pub fn payload(&self) -> anyhow::Result<Payload> {
        Payload::decode(&self.payload)
    }
}

/// Outbound half of the transport, implemented by the embedder.
///
/// The client calls this from within its dispatch lock, so implementations
/// must hand the message off (enqueue, write to a socket) without calling
/// back into the client on the same call stack.
pub trait DatagramSink: Send + Sync {
    /// Ships one message towards the remote system.
    fn send(&self, message: &TransferMessage);
}

impl<F> DatagramSink for F
where
    F: Fn(&TransferMessage) + Send + Sync,
{
    fn send(&self, message: &TransferMessage) {
        self(message);
    }
}
