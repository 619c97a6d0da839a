//! Character-device-style boundary for user-space consumers.
//!
//! Models the host OS file contract of the original driver: reads drain the
//! pending queue in fixed-size records (one record = one full wire frame,
//! [`FRAME_BYTES`] bytes), an ioctl-style control op forwards SETs
//! fire-and-forget and blocks GETs on the correlator, and a poll-style
//! readiness check reports a non-empty pending queue.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;
use crate::wire::{self, CommandType, Core, Payload, FRAME_BYTES};
use crate::{CorrelatorError, MailboxAudio, SendError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer length {0} is not a positive multiple of the {FRAME_BYTES}-byte record size")]
    BadRecordSize(usize),
    /// No reply slot free, or the remote did not answer in time. The caller
    /// may retry.
    #[error("control channel busy")]
    Busy,
    #[error("transport failure: {0}")]
    Io(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] wire::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlOp {
    /// Fire-and-forget; returns as soon as the transport accepts the frame.
    Set,
    /// Blocks for the configured request timeout and yields the reply.
    Get,
}

/// The fixed-size control request passed to [`ControlDevice::ioctl`].
#[derive(Debug, Clone, Copy)]
pub struct CtlRequest {
    pub op: CtlOp,
    pub core: Core,
    pub cmd_type: CommandType,
    pub payload: Payload,
}

pub struct ControlDevice {
    audio: Arc<MailboxAudio>,
}

impl ControlDevice {
    pub fn new(audio: Arc<MailboxAudio>) -> Self {
        ControlDevice { audio }
    }

    /// Drains pending frames into `buf`, one full wire frame per
    /// [`FRAME_BYTES`]-byte record, native word order. Returns the number of
    /// bytes written (possibly 0). Short or misaligned buffers are rejected.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() || buf.len() % FRAME_BYTES != 0 {
            return Err(Error::BadRecordSize(buf.len()));
        }
        let frames = self.audio.pending().drain(buf.len() / FRAME_BYTES);
        for (record, frame) in buf.chunks_exact_mut(FRAME_BYTES).zip(frames.iter()) {
            for (bytes, word) in record.chunks_exact_mut(4).zip(frame.to_wire()) {
                bytes.copy_from_slice(&word.to_ne_bytes());
            }
        }
        Ok(frames.len() * FRAME_BYTES)
    }

    /// Forwards a control request. `Set` returns `None`; `Get` returns the
    /// reply payload. Timeout and slot exhaustion both surface as
    /// [`Error::Busy`] so callers can apply one retry policy.
    pub fn ioctl(&self, req: &CtlRequest) -> Result<Option<Payload>, Error> {
        match req.op {
            CtlOp::Set => {
                self.audio
                    .send_set(req.core, req.cmd_type, req.payload.as_slice())
                    .map_err(|e| match e {
                        SendError::Wire(e) => Error::Wire(e),
                        SendError::Transport(e) => Error::Io(e),
                    })?;
                Ok(None)
            }
            CtlOp::Get => {
                let reply = self
                    .audio
                    .submit_request(req.core, req.cmd_type, req.payload.as_slice())
                    .map_err(|e| match e {
                        CorrelatorError::NoSlotAvailable | CorrelatorError::Timeout => Error::Busy,
                        CorrelatorError::SendFailed(e) => Error::Io(e),
                        CorrelatorError::Wire(e) => Error::Wire(e),
                    })?;
                Ok(Some(reply.payload))
            }
        }
    }

    /// Poll/select-style readiness: true once the pending queue is
    /// non-empty.
    pub fn poll(&self, timeout: Duration) -> bool {
        self.audio.pending().wait_for_data(timeout)
    }
}
