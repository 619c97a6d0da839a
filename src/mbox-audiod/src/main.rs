//! Demo service: the mailbox audio core wired to an in-process DSP emulator.
//!
//! Exercises the whole control path end to end: codec get/set over
//! REQUEST/REPLY, position updates into registered handlers, and unclaimed
//! notification frames drained through the character-device-style boundary.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal;

pub(crate) mod config;
pub(crate) mod emulator;
pub(crate) mod logging;

use codec_vir::position::PositionTracker;
use codec_vir::VirCodec;
use mbox_audio::chardev::ControlDevice;
use mbox_audio::transport::flavors::loopback;
use mbox_audio::wire::{FRAME_BYTES, FRAME_WORDS};
use mbox_audio::{Core, Frame, MailboxAudio, MailboxTransport};

use config::Config;
use emulator::DspEmulator;

#[derive(Debug, Clone, Parser)]
#[command(name = "mbox-audiod")]
struct Opts {
    /// Config path; defaults apply if the file does not exist
    #[arg(short, long, default_value = "mbox-audiod.toml")]
    config: PathBuf,
    #[arg(long)]
    no_ansi: bool,
}

static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(sig: i32) {
    assert_eq!(sig, signal::SIGINT as i32);
    TERMINATE.store(true, Ordering::Relaxed);
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let config = if opts.config.exists() {
        Config::from_path(&opts.config)
            .with_context(|| format!("failed to load {}", opts.config.display()))?
    } else {
        Config::default()
    };
    logging::init_log(&config, !opts.no_ansi);

    let sig_action = signal::SigAction::new(
        signal::SigHandler::Handler(handle_sigint),
        signal::SaFlags::empty(),
        signal::SigSet::empty(),
    );
    unsafe { signal::sigaction(signal::SIGINT, &sig_action) }
        .context("failed to register sighandler")?;

    // local core on one end of the loopback mailbox, DSP emulator on the other
    let (local, remote) = loopback::pair();
    let local = Arc::new(local);
    let audio = Arc::new(MailboxAudio::new(
        Arc::clone(&local) as Arc<dyn MailboxTransport>,
        &config.audio,
    ));
    local.bind_sink(Box::new(audio.rx_sink()));
    let _emulator = DspEmulator::start(remote);

    let tracker = PositionTracker::new();
    PositionTracker::register(&tracker, &audio).context("position handler registration")?;

    let codec = VirCodec::new(Arc::clone(&audio), Core::Main);
    codec.set_master_volume(12).context("codec volume write")?;
    match codec.master_volume() {
        Ok(vol) => tracing::info!("codec reports master volume {}", vol),
        Err(e) => tracing::warn!("codec volume read failed: {}", e),
    }

    tracing::info!("mbox-audiod up, ^C to stop");
    let dev = ControlDevice::new(Arc::clone(&audio));
    let mut buf = [0u8; 4 * FRAME_BYTES];
    while !TERMINATE.load(Ordering::Relaxed) {
        if !dev.poll(Duration::from_millis(200)) {
            tracing::debug!("stream 0 position: {}", tracker.position(0));
            continue;
        }
        let nbytes = dev.read(&mut buf).context("device read")?;
        for record in buf[..nbytes].chunks_exact(FRAME_BYTES) {
            let mut words = [0u32; FRAME_WORDS];
            for (word, bytes) in words.iter_mut().zip(record.chunks_exact(4)) {
                *word = u32::from_ne_bytes(bytes.try_into().expect("4-byte chunk"));
            }
            match Frame::from_wire(&words) {
                Ok(frame) => tracing::info!(
                    "unclaimed frame: {:?} {:?} {:?}",
                    frame.usage,
                    frame.cmd_type,
                    frame.payload
                ),
                Err(e) => tracing::warn!("undecodable record from device: {}", e),
            }
        }
    }

    tracing::info!("shutting down");
    Ok(())
}
