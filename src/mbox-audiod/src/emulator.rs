//! DSP-side emulator.
//!
//! Stands in for the remote audio co-processor: keeps a tiny codec register
//! file, answers REQUESTs, acknowledges codec writes with an EFFECT
//! notification (which the core parks on the pending queue, giving the
//! reader loop real traffic), and pushes periodic playback position updates
//! for stream 0.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use mbox_audio::transport::flavors::loopback::LoopbackEndpoint;
use mbox_audio::wire::WireBuffer;
use mbox_audio::{CommandType, Frame, MailboxTransport, Usage};

const NUM_REGS: usize = 8;
const POSITION_PERIOD: Duration = Duration::from_millis(100);

struct Inner {
    endpoint: Arc<LoopbackEndpoint>,
    regs: Mutex<[u32; NUM_REGS]>,
    position: AtomicU32,
}

impl Inner {
    fn on_frame(&self, buf: &WireBuffer) {
        let frame = match Frame::from_wire(buf) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("emulator: invalid frame dropped: {}", e);
                return;
            }
        };
        match (frame.usage, frame.cmd_type) {
            (Usage::Set, CommandType::Codec) => self.codec_write(&frame),
            (Usage::Request, CommandType::Codec) => self.codec_read(&frame),
            (Usage::Request, CommandType::Pcm) => self.pcm_status(&frame),
            (Usage::Set, _) | (Usage::Request, _) => {
                tracing::debug!(
                    "emulator: ignoring {:?} {:?}",
                    frame.usage,
                    frame.cmd_type
                );
            }
            (Usage::Reply, _) => {
                tracing::warn!("emulator: unexpected REPLY frame, dropped");
            }
        }
    }

    fn codec_write(&self, frame: &Frame) {
        let payload = frame.payload.as_slice();
        let [reg, value] = payload else {
            tracing::warn!("emulator: malformed codec write {:?}", payload);
            return;
        };
        if (*reg as usize) < NUM_REGS {
            self.regs.lock().unwrap()[*reg as usize] = *value;
            // notify interested readers about the change
            let note =
                Frame::new(Usage::Set, frame.core, CommandType::Effect, 0, &[*reg, *value])
                    .expect("two-word payload");
            let _ = self.endpoint.send(&note.to_wire());
        } else {
            tracing::warn!("emulator: codec write to bad reg {:#x}", reg);
        }
    }

    fn codec_read(&self, frame: &Frame) {
        let Some(&reg) = frame.payload.as_slice().first() else {
            tracing::warn!("emulator: codec read without register");
            return;
        };
        if (reg as usize) >= NUM_REGS {
            tracing::warn!("emulator: codec read from bad reg {:#x}", reg);
            return;
        }
        let value = self.regs.lock().unwrap()[reg as usize];
        self.reply(frame, &[reg, value]);
    }

    fn pcm_status(&self, frame: &Frame) {
        let stream = frame.payload.as_slice().first().copied().unwrap_or(0);
        self.reply(frame, &[stream, self.position.load(Ordering::Relaxed)]);
    }

    fn reply(&self, request: &Frame, payload: &[u32]) {
        let reply = Frame::new(
            Usage::Reply,
            request.core,
            request.cmd_type,
            request.slot,
            payload,
        )
        .expect("reply payload within bounds");
        if self.endpoint.send(&reply.to_wire()).is_err() {
            tracing::warn!("emulator: reply dropped, link down");
        }
    }
}

pub(crate) struct DspEmulator {
    stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl DspEmulator {
    /// Binds the emulator to its endpoint and starts the position ticker.
    pub(crate) fn start(endpoint: LoopbackEndpoint) -> Self {
        let endpoint = Arc::new(endpoint);
        let inner = Arc::new(Inner {
            endpoint: Arc::clone(&endpoint),
            regs: Mutex::new([0; NUM_REGS]),
            position: AtomicU32::new(0),
        });

        let sink = Arc::clone(&inner);
        endpoint.bind_sink(Box::new(move |buf: &WireBuffer| sink.on_frame(buf)));

        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let ticker = std::thread::Builder::new()
            .name("dsp-emu-pos".to_owned())
            .spawn(move || {
                while !stop2.load(Ordering::Acquire) {
                    std::thread::sleep(POSITION_PERIOD);
                    let pos = inner.position.fetch_add(256, Ordering::Relaxed) + 256;
                    let frame =
                        Frame::new(Usage::Set, mbox_audio::Core::Main, CommandType::Position0, 0, &[pos])
                            .expect("one-word payload");
                    if inner.endpoint.send(&frame.to_wire()).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn emulator ticker");

        DspEmulator {
            stop,
            ticker: Some(ticker),
        }
    }
}

impl Drop for DspEmulator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}
