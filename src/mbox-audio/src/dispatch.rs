//! Inbound frame classification and routing.
//!
//! The transport's receive context must stay O(1) and non-blocking, so the
//! sink only copies the frame, picks a bucket and enqueues. One worker thread
//! per bucket performs the actual handler lookup, so high-frequency position
//! traffic on one stream cannot starve command traffic on another. REPLY
//! frames never touch the buckets; they go straight to the correlator to keep
//! reply latency independent of unrelated traffic.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender};
use dashmap::DashMap;
use thiserror::Error;

use crate::queue::PendingQueue;
use crate::slot::Correlator;
use crate::wire::{CommandType, Frame, Usage, WireBuffer, NUM_POSITION_STREAMS};

/// PCM/CODEC/EFFECT share one bucket; each position stream gets its own.
pub(crate) const NUM_BUCKETS: usize = 1 + NUM_POSITION_STREAMS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a handler is already registered for {0:?}")]
    AlreadyRegistered(CommandType),
}

/// A kernel-side consumer of SET/REQUEST frames for one command type.
///
/// Invoked from worker-thread context; implementations should be quick and
/// must not call back into `submit_request` synchronously (re-entrancy would
/// stall the worker for the full request timeout).
pub trait CommandHandler: Send + Sync {
    fn handle(&self, payload: &[u32], cmd_type: CommandType);
}

/// At most one handler per command type; registered once at init, read on
/// every inbound frame.
pub struct DispatchTable {
    handlers: DashMap<CommandType, Arc<dyn CommandHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        DispatchTable {
            handlers: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        cmd_type: CommandType,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), DispatchError> {
        use dashmap::mapref::entry::Entry;
        match self.handlers.entry(cmd_type) {
            Entry::Occupied(_) => Err(DispatchError::AlreadyRegistered(cmd_type)),
            Entry::Vacant(e) => {
                e.insert(handler);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, cmd_type: CommandType) -> bool {
        self.handlers.remove(&cmd_type).is_some()
    }

    fn get(&self, cmd_type: CommandType) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&cmd_type).map(|h| Arc::clone(h.value()))
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_of(cmd_type: CommandType) -> usize {
    match cmd_type.position_stream() {
        Some(stream) => 1 + stream,
        None => 0,
    }
}

fn bucket_name(bucket: usize) -> String {
    if bucket == 0 {
        "maudio-cmd".to_owned()
    } else {
        format!("maudio-pos{}", bucket - 1)
    }
}

/// The per-bucket worker pool plus the receive-side classifier.
///
/// Dropping the `Dispatcher` disconnects its ends of the bucket queues; each
/// worker exits once the transport also releases its [`RxSink`] (the other
/// sender clone). Workers are deliberately not joined on drop: the transport
/// may outlive the core, and joining here would deadlock on a sink the
/// transport still holds.
pub(crate) struct Dispatcher {
    senders: Vec<Sender<Frame>>,
    _workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn start(table: Arc<DispatchTable>, pending: Arc<PendingQueue>) -> Self {
        let mut senders = Vec::with_capacity(NUM_BUCKETS);
        let mut workers = Vec::with_capacity(NUM_BUCKETS);
        for bucket in 0..NUM_BUCKETS {
            let (tx, rx) = crossbeam::channel::unbounded();
            senders.push(tx);
            let table = Arc::clone(&table);
            let pending = Arc::clone(&pending);
            let handle = std::thread::Builder::new()
                .name(bucket_name(bucket))
                .spawn(move || worker_loop(rx, table, pending))
                .expect("failed to spawn dispatch worker");
            workers.push(handle);
        }
        Dispatcher {
            senders,
            _workers: workers,
        }
    }

    /// Creates the sink handed to the transport. Holds its own clones of the
    /// bucket senders so the `Dispatcher` can be dropped (disconnecting the
    /// workers) independently of the transport's lifetime.
    pub(crate) fn rx_sink(&self, correlator: Arc<Correlator>) -> RxSink {
        RxSink {
            correlator,
            senders: self.senders.clone(),
        }
    }

}

fn worker_loop(rx: Receiver<Frame>, table: Arc<DispatchTable>, pending: Arc<PendingQueue>) {
    for frame in rx.iter() {
        match table.get(frame.cmd_type) {
            Some(handler) => handler.handle(frame.payload.as_slice(), frame.cmd_type),
            None => pending.enqueue(frame),
        }
    }
}

/// The transport-facing receive path: decode, then either hand a REPLY to the
/// correlator or park a SET/REQUEST on its bucket. Invalid frames are logged
/// and dropped; nothing here may panic or block.
pub struct RxSink {
    correlator: Arc<Correlator>,
    senders: Vec<Sender<Frame>>,
}

impl RxSink {
    pub fn on_frame(&self, buf: &WireBuffer) {
        let frame = match Frame::from_wire(buf) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("invalid inbound frame dropped: {}", e);
                return;
            }
        };
        match frame.usage {
            Usage::Reply => {
                self.correlator
                    .deliver_reply(frame.slot, frame.cmd_type, frame.payload);
            }
            Usage::Set | Usage::Request => {
                let bucket = bucket_of(frame.cmd_type);
                if self.senders[bucket].send(frame).is_err() {
                    tracing::warn!("dispatch workers gone, inbound frame dropped");
                }
            }
        }
    }
}

impl crate::transport::FrameSink for RxSink {
    fn on_frame(&self, frame: &WireBuffer) {
        RxSink::on_frame(self, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<Vec<u32>>>);

    impl CommandHandler for Recorder {
        fn handle(&self, payload: &[u32], _cmd_type: CommandType) {
            self.0.lock().unwrap().push(payload.to_vec());
        }
    }

    #[test]
    fn one_handler_per_command_type() {
        let table = DispatchTable::new();
        let h = Arc::new(Recorder(Mutex::new(Vec::new())));
        table.register(CommandType::Codec, h.clone()).unwrap();
        assert_eq!(
            table.register(CommandType::Codec, h.clone()),
            Err(DispatchError::AlreadyRegistered(CommandType::Codec))
        );
        assert!(table.unregister(CommandType::Codec));
        table.register(CommandType::Codec, h).unwrap();
    }

    #[test]
    fn bucket_assignment() {
        assert_eq!(bucket_of(CommandType::Pcm), 0);
        assert_eq!(bucket_of(CommandType::Codec), 0);
        assert_eq!(bucket_of(CommandType::Effect), 0);
        assert_eq!(bucket_of(CommandType::Position0), 1);
        assert_eq!(bucket_of(CommandType::Position8), 9);
    }
}
