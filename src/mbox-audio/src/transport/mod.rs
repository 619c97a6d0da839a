//! Mailbox transport abstraction.
//!
//! The actual inter-processor doorbell + shared buffer belongs to the host
//! platform; the core only needs a way to push one fixed-size frame and a
//! sink invoked once per inbound frame. The sink runs on the transport's
//! delivery context and must not block.

pub mod flavors;

use thiserror::Error;

use crate::wire::WireBuffer;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("mailbox link down")]
    LinkDown,
}

/// The send half of a mailbox channel.
pub trait MailboxTransport: Send + Sync {
    /// Forwards one frame to the remote processor. May block briefly on
    /// transport flow control.
    fn send(&self, frame: &WireBuffer) -> Result<(), TransportError>;
}

/// Receives inbound frames. Registered exactly once per endpoint.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &WireBuffer);
}

impl<F> FrameSink for F
where
    F: Fn(&WireBuffer) + Send + Sync,
{
    fn on_frame(&self, frame: &WireBuffer) {
        self(frame)
    }
}
