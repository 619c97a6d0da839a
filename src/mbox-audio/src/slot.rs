//! Request/reply correlation over a fixed pool of reply slots.
//!
//! A REQUEST claims one slot, carries the slot's token on the wire, and the
//! remote echoes the token back on the REPLY. The pool is the concurrency
//! bound: when every slot is reserved, new requests fail immediately instead
//! of queuing.
//!
//! The 8-bit wire token packs a generation counter above the slot index
//! (`(gen & 0x1f) << 3 | index`). Every release bumps the generation, so a
//! reply that arrives after its request timed out carries a stale token and
//! is rejected even if the slot index has since been re-reserved by an
//! unrelated caller.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::transport::{MailboxTransport, TransportError};
use crate::wire::{self, CommandType, Core, Frame, Payload, Usage};

/// Maximum number of concurrently outstanding requests.
pub const NUM_SLOTS: usize = 8;

const INDEX_BITS: u32 = 3;
const INDEX_MASK: u8 = (1 << INDEX_BITS) - 1;
const GEN_MASK: u8 = 0x1f;

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("no reply slot available")]
    NoSlotAvailable,
    #[error("request send failed: {0}")]
    SendFailed(#[from] TransportError),
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Wire(#[from] wire::Error),
}

/// The payload of a successfully correlated reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub cmd_type: CommandType,
    pub payload: Payload,
}

#[derive(Debug)]
struct SlotState {
    reserved: bool,
    updated: bool,
    /// Generation the current (or next) reservation hands out on the wire.
    gen: u8,
    reply: Option<Reply>,
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    replied: Condvar,
}

impl Slot {
    fn new() -> Self {
        Slot {
            state: Mutex::new(SlotState {
                reserved: false,
                updated: false,
                gen: 0,
                reply: None,
            }),
            replied: Condvar::new(),
        }
    }
}

fn pack_token(index: usize, gen: u8) -> u8 {
    debug_assert!(index < NUM_SLOTS);
    (gen & GEN_MASK) << INDEX_BITS | index as u8
}

fn unpack_token(token: u8) -> (usize, u8) {
    ((token & INDEX_MASK) as usize, token >> INDEX_BITS)
}

/// Tracks in-flight requests, matches replies, times out.
pub struct Correlator {
    slots: [Slot; NUM_SLOTS],
    transport: Arc<dyn MailboxTransport>,
}

impl Correlator {
    pub fn new(transport: Arc<dyn MailboxTransport>) -> Self {
        Correlator {
            slots: std::array::from_fn(|_| Slot::new()),
            transport,
        }
    }

    /// Sends a REQUEST and blocks until the matching REPLY or `timeout`.
    ///
    /// Fails fast with [`CorrelatorError::NoSlotAvailable`] when every slot
    /// is reserved; the protocol does not buffer requests. Must not be called
    /// from a dispatch worker or the transport's receive context.
    pub fn submit_request(
        &self,
        core: Core,
        cmd_type: CommandType,
        payload: &[u32],
        timeout: Duration,
    ) -> Result<Reply, CorrelatorError> {
        let payload = Payload::copy_from(payload)?;
        let (index, token) = self.reserve().ok_or(CorrelatorError::NoSlotAvailable)?;

        let frame = Frame {
            usage: Usage::Request,
            core,
            cmd_type,
            slot: token,
            payload,
        };
        if let Err(e) = self.transport.send(&frame.to_wire()) {
            self.release(index);
            return Err(CorrelatorError::SendFailed(e));
        }

        self.wait(index, timeout)
    }

    /// Claims a free slot, clearing its `updated` flag, and returns the wire
    /// token for it.
    fn reserve(&self) -> Option<(usize, u8)> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut state = slot.state.lock().unwrap();
            if !state.reserved {
                state.reserved = true;
                state.updated = false;
                state.reply = None;
                return Some((index, pack_token(index, state.gen)));
            }
        }
        None
    }

    /// Releases a slot and bumps its generation so stale wire tokens stop
    /// matching.
    fn release(&self, index: usize) {
        let mut state = self.slots[index].state.lock().unwrap();
        state.reserved = false;
        state.updated = false;
        state.reply = None;
        state.gen = state.gen.wrapping_add(1) & GEN_MASK;
    }

    fn wait(&self, index: usize, timeout: Duration) -> Result<Reply, CorrelatorError> {
        let slot = &self.slots[index];
        let deadline = Instant::now() + timeout;
        let mut state = slot.state.lock().unwrap();
        while !state.updated {
            let now = Instant::now();
            if now >= deadline {
                drop(state);
                self.release(index);
                return Err(CorrelatorError::Timeout);
            }
            let (next, _timed_out) = slot
                .replied
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
        }
        let reply = state.reply.take().expect("updated slot without a reply");
        drop(state);
        self.release(index);
        Ok(reply)
    }

    /// Called from the receive path when a REPLY frame arrives. Replies to
    /// unreserved slots or with a stale generation are dropped with a
    /// warning; the original caller has already given up.
    pub fn deliver_reply(&self, token: u8, cmd_type: CommandType, payload: Payload) {
        let (index, gen) = unpack_token(token);
        if index >= NUM_SLOTS {
            tracing::warn!("reply for out-of-range slot {}, dropped", index);
            return;
        }
        let slot = &self.slots[index];
        let mut state = slot.state.lock().unwrap();
        if !state.reserved {
            tracing::warn!("reply for unreserved slot {}, dropped", index);
            return;
        }
        if state.gen & GEN_MASK != gen {
            tracing::warn!(
                "stale reply for slot {} (gen {} != {}), dropped",
                index,
                gen,
                state.gen & GEN_MASK
            );
            return;
        }
        state.reply = Some(Reply { cmd_type, payload });
        state.updated = true;
        slot.replied.notify_one();
    }

    #[cfg(test)]
    fn reserved_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.lock().unwrap().reserved)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::flavors::loopback;

    fn correlator() -> (Correlator, loopback::LoopbackEndpoint) {
        let (local, remote) = loopback::pair();
        (Correlator::new(Arc::new(local)), remote)
    }

    fn payload(words: &[u32]) -> Payload {
        Payload::copy_from(words).unwrap()
    }

    #[test]
    fn pool_exhaustion_fails_fast() {
        let (c, _remote) = correlator();
        let tokens: Vec<_> = (0..NUM_SLOTS).map(|_| c.reserve().unwrap()).collect();
        assert!(c.reserve().is_none());
        assert_eq!(c.reserved_count(), NUM_SLOTS);
        // distinct slots for concurrent reservations
        let mut indices: Vec<_> = tokens.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), NUM_SLOTS);
    }

    #[test]
    fn send_failure_releases_slot() {
        let (local, _remote) = loopback::pair();
        local.set_link_down(true);
        let c = Correlator::new(Arc::new(local));
        let err = c
            .submit_request(Core::Main, CommandType::Pcm, &[1], Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, CorrelatorError::SendFailed(_)));
        assert_eq!(c.reserved_count(), 0);
    }

    #[test]
    fn timeout_releases_slot() {
        let (c, _remote) = correlator();
        let err = c
            .submit_request(Core::Main, CommandType::Pcm, &[1], Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, CorrelatorError::Timeout));
        assert_eq!(c.reserved_count(), 0);
    }

    #[test]
    fn reply_to_unreserved_slot_is_dropped() {
        let (c, _remote) = correlator();
        c.deliver_reply(0, CommandType::Pcm, payload(&[1]));
        assert_eq!(c.reserved_count(), 0);
    }

    #[test]
    fn stale_generation_is_dropped() {
        let (c, _remote) = correlator();
        let (index, stale_token) = c.reserve().unwrap();
        // original request times out
        c.release(index);
        // an unrelated caller re-reserves the same index with a new token
        let (index2, fresh_token) = c.reserve().unwrap();
        assert_eq!(index2, index);
        assert_ne!(stale_token, fresh_token);

        c.deliver_reply(stale_token, CommandType::Codec, payload(&[0xbad]));
        assert!(!c.slots[index].state.lock().unwrap().updated);

        c.deliver_reply(fresh_token, CommandType::Codec, payload(&[0x600d]));
        let state = c.slots[index].state.lock().unwrap();
        assert!(state.updated);
        assert_eq!(state.reply.unwrap().payload.as_slice(), &[0x600d]);
    }

    #[test]
    fn delivered_reply_wakes_waiter() {
        let (c, remote) = correlator();
        let c = Arc::new(c);
        crossbeam::thread::scope(|s| {
            let c2 = Arc::clone(&c);
            let waiter = s.spawn(move |_| {
                c2.submit_request(
                    Core::Main,
                    CommandType::Codec,
                    &[0x10],
                    Duration::from_secs(2),
                )
            });
            // echo a reply for whatever token the request carried
            let (tx, rx) = crossbeam::channel::unbounded();
            remote.bind_sink(Box::new(move |buf: &crate::wire::WireBuffer| {
                tx.send(*buf).unwrap();
            }));
            let req = Frame::from_wire(&rx.recv().unwrap()).unwrap();
            assert_eq!(req.usage, Usage::Request);
            c.deliver_reply(req.slot, req.cmd_type, payload(&[42]));

            let reply = waiter.join().unwrap().unwrap();
            assert_eq!(reply.payload.as_slice(), &[42]);
            assert_eq!(c.reserved_count(), 0);
        })
        .unwrap();
    }
}
