//! Virtual codec over the mailbox audio control channel.
//!
//! The real codec hardware hangs off the remote processor; this end only
//! exchanges CODEC command frames with it. Writes are fire-and-forget SETs,
//! reads are REQUESTs bounded by the core's request timeout.
//!
//! Codec payload convention (shared with the remote firmware):
//! SET carries `[register, value]`; REQUEST carries `[register]`; the REPLY
//! echoes `[register, value]`.

pub mod position;

use std::sync::Arc;

use thiserror::Error;

use mbox_audio::{CommandType, Core, CorrelatorError, MailboxAudio, SendError};

/// Codec register identifiers understood by the remote firmware.
pub mod regs {
    pub const MASTER_VOLUME: u32 = 0x00;
    pub const MUTE: u32 = 0x01;
    pub const INPUT_SOURCE: u32 = 0x02;
    pub const SAMPLE_RATE: u32 = 0x03;
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Request(#[from] CorrelatorError),
    /// The remote answered, but not with `[register, value]` for the
    /// register we asked about.
    #[error("malformed codec reply")]
    BadReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Primary = 0,
    Secondary = 1,
    Microphone = 2,
}

/// A control handle for the virtual codec on one co-processor.
pub struct VirCodec {
    audio: Arc<MailboxAudio>,
    core: Core,
}

impl VirCodec {
    pub fn new(audio: Arc<MailboxAudio>, core: Core) -> Self {
        VirCodec { audio, core }
    }

    fn write(&self, reg: u32, value: u32) -> Result<(), CodecError> {
        self.audio
            .send_set(self.core, CommandType::Codec, &[reg, value])?;
        Ok(())
    }

    fn read(&self, reg: u32) -> Result<u32, CodecError> {
        let reply = self
            .audio
            .submit_request(self.core, CommandType::Codec, &[reg])?;
        match reply.payload.as_slice() {
            [r, value, ..] if *r == reg => Ok(*value),
            other => {
                tracing::warn!("unexpected codec reply for reg {:#x}: {:?}", reg, other);
                Err(CodecError::BadReply)
            }
        }
    }

    /// Volume in half-dB steps of attenuation; 0 is full scale.
    pub fn set_master_volume(&self, attenuation: u32) -> Result<(), CodecError> {
        self.write(regs::MASTER_VOLUME, attenuation)
    }

    pub fn master_volume(&self) -> Result<u32, CodecError> {
        self.read(regs::MASTER_VOLUME)
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), CodecError> {
        self.write(regs::MUTE, muted as u32)
    }

    pub fn is_muted(&self) -> Result<bool, CodecError> {
        Ok(self.read(regs::MUTE)? != 0)
    }

    pub fn set_input_source(&self, source: InputSource) -> Result<(), CodecError> {
        self.write(regs::INPUT_SOURCE, source as u32)
    }

    pub fn sample_rate(&self) -> Result<u32, CodecError> {
        self.read(regs::SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mbox_audio::transport::flavors::loopback;
    use mbox_audio::wire::WireBuffer;
    use mbox_audio::{Config, Frame, MailboxTransport, Usage};

    /// Remote side answering codec REQUESTs from a tiny register file.
    fn codec_with_remote_regs() -> VirCodec {
        let (local, remote) = loopback::pair();
        let local = Arc::new(local);
        let audio = Arc::new(MailboxAudio::new(
            Arc::clone(&local) as Arc<dyn MailboxTransport>,
            &Config::default(),
        ));
        local.bind_sink(Box::new(audio.rx_sink()));

        let remote = Arc::new(remote);
        let responder = Arc::clone(&remote);
        let regs = std::sync::Mutex::new([0u32; 8]);
        remote.bind_sink(Box::new(move |buf: &WireBuffer| {
            let frame = Frame::from_wire(buf).unwrap();
            let mut regs = regs.lock().unwrap();
            match frame.usage {
                Usage::Set => {
                    let p = frame.payload.as_slice();
                    regs[p[0] as usize] = p[1];
                }
                Usage::Request => {
                    let reg = frame.payload.as_slice()[0];
                    let reply = Frame::new(
                        Usage::Reply,
                        frame.core,
                        frame.cmd_type,
                        frame.slot,
                        &[reg, regs[reg as usize]],
                    )
                    .unwrap();
                    responder.send(&reply.to_wire()).unwrap();
                }
                Usage::Reply => unreachable!("codec end never sends requests to us"),
            }
        }));
        VirCodec::new(audio, Core::Main)
    }

    #[test]
    fn volume_write_then_read_back() {
        let codec = codec_with_remote_regs();
        codec.set_master_volume(24).unwrap();
        // SET and REQUEST share the channel in order, so the read observes
        // the write
        assert_eq!(codec.master_volume().unwrap(), 24);
    }

    #[test]
    fn mute_round_trip() {
        let codec = codec_with_remote_regs();
        assert!(!codec.is_muted().unwrap());
        codec.set_muted(true).unwrap();
        assert!(codec.is_muted().unwrap());
    }

    #[test]
    fn read_times_out_without_remote() {
        let (local, _remote) = loopback::pair();
        let local = Arc::new(local);
        let config = Config {
            request_timeout_ms: 20,
            ..Config::default()
        };
        let audio = Arc::new(MailboxAudio::new(
            Arc::clone(&local) as Arc<dyn MailboxTransport>,
            &config,
        ));
        local.bind_sink(Box::new(audio.rx_sink()));
        let codec = VirCodec::new(audio, Core::Main);
        assert!(matches!(
            codec.master_volume(),
            Err(CodecError::Request(CorrelatorError::Timeout))
        ));
    }

    #[test]
    fn malformed_reply_is_rejected() {
        let (local, remote) = loopback::pair();
        let local = Arc::new(local);
        let audio = Arc::new(MailboxAudio::new(
            Arc::clone(&local) as Arc<dyn MailboxTransport>,
            &Config::default(),
        ));
        local.bind_sink(Box::new(audio.rx_sink()));

        let remote = Arc::new(remote);
        let responder = Arc::clone(&remote);
        remote.bind_sink(Box::new(move |buf: &WireBuffer| {
            let frame = Frame::from_wire(buf).unwrap();
            if frame.usage == Usage::Request {
                // reply names the wrong register
                let reply = Frame::new(
                    Usage::Reply,
                    frame.core,
                    frame.cmd_type,
                    frame.slot,
                    &[0xff, 0],
                )
                .unwrap();
                responder.send(&reply.to_wire()).unwrap();
            }
        }));
        let codec = VirCodec::new(audio, Core::Main);
        assert!(matches!(
            codec.master_volume(),
            Err(CodecError::BadReply)
        ));
    }
}
