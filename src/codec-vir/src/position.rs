//! Playback position reporting.
//!
//! The remote processor pushes one SET frame per period on the POSITION_n
//! command type of each running stream, carrying `[frame_counter]`. The
//! tracker registers for all nine streams and keeps the latest counter per
//! stream for the PCM layer to poll; position updates are high-frequency, so
//! the handler does nothing beyond one atomic store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mbox_audio::wire::NUM_POSITION_STREAMS;
use mbox_audio::{CommandHandler, CommandType, DispatchError, MailboxAudio};

#[derive(Default)]
pub struct PositionTracker {
    positions: [AtomicU32; NUM_POSITION_STREAMS],
}

impl PositionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `tracker` for every position command type.
    pub fn register(
        tracker: &Arc<Self>,
        audio: &MailboxAudio,
    ) -> Result<(), DispatchError> {
        for stream in 0..NUM_POSITION_STREAMS {
            let cmd_type = CommandType::position(stream).expect("stream in range");
            audio.register_handler(cmd_type, Arc::clone(tracker) as Arc<dyn CommandHandler>)?;
        }
        Ok(())
    }

    /// Latest reported frame counter for `stream`, 0 if never reported.
    pub fn position(&self, stream: usize) -> u32 {
        self.positions[stream].load(Ordering::Acquire)
    }
}

impl CommandHandler for PositionTracker {
    fn handle(&self, payload: &[u32], cmd_type: CommandType) {
        let Some(stream) = cmd_type.position_stream() else {
            tracing::warn!("position tracker got non-position frame {:?}", cmd_type);
            return;
        };
        match payload.first() {
            Some(&counter) => self.positions[stream].store(counter, Ordering::Release),
            None => tracing::warn!("empty position update for stream {}", stream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mbox_audio::transport::flavors::loopback;
    use mbox_audio::{Config, Core, Frame, MailboxTransport, Usage};

    #[test]
    fn tracks_latest_position_per_stream() {
        let (local, remote) = loopback::pair();
        let local = Arc::new(local);
        let audio = Arc::new(MailboxAudio::new(
            Arc::clone(&local) as Arc<dyn MailboxTransport>,
            &Config::default(),
        ));
        local.bind_sink(Box::new(audio.rx_sink()));

        let tracker = PositionTracker::new();
        PositionTracker::register(&tracker, &audio).unwrap();

        for counter in [100u32, 200, 300] {
            let frame = Frame::new(
                Usage::Set,
                Core::Main,
                CommandType::Position2,
                0,
                &[counter],
            )
            .unwrap();
            remote.send(&frame.to_wire()).unwrap();
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while tracker.position(2) != 300 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(tracker.position(2), 300);
        assert_eq!(tracker.position(3), 0);
    }

    #[test]
    fn double_registration_is_rejected() {
        let (local, _remote) = loopback::pair();
        let audio = MailboxAudio::new(
            Arc::new(local) as Arc<dyn MailboxTransport>,
            &Config::default(),
        );
        let tracker = PositionTracker::new();
        PositionTracker::register(&tracker, &audio).unwrap();
        assert!(PositionTracker::register(&tracker, &audio).is_err());
    }
}
