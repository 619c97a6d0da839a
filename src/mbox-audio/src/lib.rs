//! Mailbox audio control core.
//!
//! Implements the command/reply protocol multiplexed over a shared
//! inter-processor mailbox channel: a fixed 32-word frame format, a bounded
//! pool of in-flight request slots with timeout, per-command-type dispatch to
//! registered handlers, and a fallback queue for a polling user-space reader.
//!
//! All state hangs off an explicit [`MailboxAudio`] handle owned by whoever
//! assembles the subsystem; there are no globals.

pub mod chardev;
pub mod config;
pub mod dispatch;
pub mod queue;
pub mod slot;
pub mod transport;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use config::Config;
pub use dispatch::{CommandHandler, DispatchError, RxSink};
pub use slot::{CorrelatorError, Reply, NUM_SLOTS};
pub use transport::{FrameSink, MailboxTransport, TransportError};
pub use wire::{CommandType, Core, Frame, Payload, Usage};

use dispatch::{DispatchTable, Dispatcher};
use queue::PendingQueue;
use slot::Correlator;

/// Errors from fire-and-forget SET submission.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Wire(#[from] wire::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One end of the mailbox audio control channel.
///
/// Dropping the handle disconnects the dispatch workers; they exit once the
/// transport also releases the sink obtained from [`MailboxAudio::rx_sink`].
pub struct MailboxAudio {
    transport: Arc<dyn MailboxTransport>,
    correlator: Arc<Correlator>,
    table: Arc<DispatchTable>,
    pending: Arc<PendingQueue>,
    dispatcher: Dispatcher,
    request_timeout: Duration,
}

impl MailboxAudio {
    pub fn new(transport: Arc<dyn MailboxTransport>, config: &Config) -> Self {
        let table = Arc::new(DispatchTable::new());
        let pending = Arc::new(PendingQueue::new(config.pending_capacity));
        let dispatcher = Dispatcher::start(Arc::clone(&table), Arc::clone(&pending));
        let correlator = Arc::new(Correlator::new(Arc::clone(&transport)));
        MailboxAudio {
            transport,
            correlator,
            table,
            pending,
            dispatcher,
            request_timeout: config.request_timeout(),
        }
    }

    /// The sink to bind to the transport's receive side. Must be registered
    /// exactly once, before inbound traffic starts.
    pub fn rx_sink(&self) -> RxSink {
        self.dispatcher.rx_sink(Arc::clone(&self.correlator))
    }

    /// Sends a fire-and-forget SET frame. Success means the transport
    /// accepted the frame, not that the remote acted on it.
    pub fn send_set(
        &self,
        core: Core,
        cmd_type: CommandType,
        payload: &[u32],
    ) -> Result<(), SendError> {
        let frame = Frame::new(Usage::Set, core, cmd_type, 0, payload)?;
        self.transport.send(&frame.to_wire())?;
        Ok(())
    }

    /// Sends a REQUEST and blocks until the matching REPLY or the configured
    /// timeout. See [`slot::Correlator::submit_request`] for the failure
    /// modes.
    pub fn submit_request(
        &self,
        core: Core,
        cmd_type: CommandType,
        payload: &[u32],
    ) -> Result<Reply, CorrelatorError> {
        self.submit_request_timeout(core, cmd_type, payload, self.request_timeout)
    }

    pub fn submit_request_timeout(
        &self,
        core: Core,
        cmd_type: CommandType,
        payload: &[u32],
        timeout: Duration,
    ) -> Result<Reply, CorrelatorError> {
        self.correlator
            .submit_request(core, cmd_type, payload, timeout)
    }

    /// Registers `handler` for every inbound SET/REQUEST frame of
    /// `cmd_type`. Unhandled command types fall through to the pending
    /// queue instead.
    pub fn register_handler(
        &self,
        cmd_type: CommandType,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), DispatchError> {
        self.table.register(cmd_type, handler)
    }

    pub fn unregister_handler(&self, cmd_type: CommandType) -> bool {
        self.table.unregister(cmd_type)
    }

    /// The queue of frames awaiting a user-space reader.
    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }
}
