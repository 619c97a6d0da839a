//! In-process loopback mailbox: a pair of endpoints connected by channels.
//!
//! Each endpoint gets its own delivery thread, so a sink is invoked from a
//! context resembling the platform mailbox callback: foreign thread, one
//! frame at a time, in send order. Used by the daemon and the tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{Receiver, Sender};

use crate::transport::{FrameSink, MailboxTransport, TransportError};
use crate::wire::WireBuffer;

pub struct LoopbackEndpoint {
    tx: Sender<WireBuffer>,
    // taken by the delivery thread when the sink is bound
    rx: Mutex<Option<Receiver<WireBuffer>>>,
    down: Arc<AtomicBool>,
}

/// Creates a connected endpoint pair. Frames sent on one side are delivered,
/// in order, to the sink bound on the other side.
pub fn pair() -> (LoopbackEndpoint, LoopbackEndpoint) {
    let (tx_a, rx_b) = crossbeam::channel::unbounded();
    let (tx_b, rx_a) = crossbeam::channel::unbounded();
    let a = LoopbackEndpoint {
        tx: tx_a,
        rx: Mutex::new(Some(rx_a)),
        down: Arc::new(AtomicBool::new(false)),
    };
    let b = LoopbackEndpoint {
        tx: tx_b,
        rx: Mutex::new(Some(rx_b)),
        down: Arc::new(AtomicBool::new(false)),
    };
    (a, b)
}

impl LoopbackEndpoint {
    /// Binds the receive sink and starts this endpoint's delivery thread.
    /// The thread exits when the peer endpoint is dropped.
    ///
    /// # Panics
    ///
    /// Panics if a sink was already bound.
    pub fn bind_sink(&self, sink: Box<dyn FrameSink>) {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("loopback sink already bound");
        thread::Builder::new()
            .name("maudio-loopback-rx".to_owned())
            .spawn(move || {
                for frame in rx.iter() {
                    sink.on_frame(&frame);
                }
            })
            .expect("failed to spawn loopback delivery thread");
    }

    /// Simulates a dead link: subsequent sends fail with
    /// [`TransportError::LinkDown`].
    pub fn set_link_down(&self, down: bool) {
        self.down.store(down, Ordering::Release);
    }
}

impl MailboxTransport for LoopbackEndpoint {
    fn send(&self, frame: &WireBuffer) -> Result<(), TransportError> {
        if self.down.load(Ordering::Acquire) {
            return Err(TransportError::LinkDown);
        }
        self.tx.send(*frame).map_err(|_| TransportError::LinkDown)
    }
}
