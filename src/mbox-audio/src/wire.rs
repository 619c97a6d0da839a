//! Wire format of mailbox audio command frames.
//!
//! Every frame is a fixed 32-word buffer: one header word followed by up to
//! 31 payload words. The header packs
//! `usage << 24 | command_type << 16 | slot << 8 | payload_len`. Both ends of
//! the mailbox share native word order, so no byte swapping is involved.

use thiserror::Error;

/// Maximum number of 32-bit payload words in one frame.
pub const MAX_PAYLOAD_WORDS: usize = 31;
/// Total frame size in words (header + payload area).
pub const FRAME_WORDS: usize = 1 + MAX_PAYLOAD_WORDS;
/// Total frame size in bytes, the record size at the device boundary.
pub const FRAME_BYTES: usize = FRAME_WORDS * 4;

/// The fixed-size buffer handed to and received from the mailbox transport.
pub type WireBuffer = [u32; FRAME_WORDS];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("payload too long: {0} words (max {MAX_PAYLOAD_WORDS})")]
    PayloadTooLong(usize),
    #[error("unknown usage code {0:#04x}")]
    BadUsage(u8),
    #[error("unknown command type {0:#04x}")]
    BadCommandType(u8),
    #[error("payload length {0} out of range")]
    BadPayloadLength(u8),
}

/// Which co-processor a frame addresses. The secondary core speaks the same
/// protocol over a distinct range of usage codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Core {
    Main,
    Sub,
}

/// Direction/semantics of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    /// Fire-and-forget, no reply expected.
    Set,
    /// Blocks the sender until the matching [`Usage::Reply`] or timeout.
    Request,
    Reply,
}

impl Usage {
    pub(crate) fn to_wire(self, core: Core) -> u32 {
        match (self, core) {
            (Usage::Set, Core::Main) => 1,
            (Usage::Request, Core::Main) => 2,
            (Usage::Reply, Core::Main) => 3,
            (Usage::Set, Core::Sub) => 4,
            (Usage::Request, Core::Sub) => 5,
            (Usage::Reply, Core::Sub) => 6,
        }
    }

    pub(crate) fn from_wire(code: u8) -> Result<(Usage, Core), Error> {
        match code {
            1 => Ok((Usage::Set, Core::Main)),
            2 => Ok((Usage::Request, Core::Main)),
            3 => Ok((Usage::Reply, Core::Main)),
            4 => Ok((Usage::Set, Core::Sub)),
            5 => Ok((Usage::Request, Core::Sub)),
            6 => Ok((Usage::Reply, Core::Sub)),
            other => Err(Error::BadUsage(other)),
        }
    }
}

/// The closed set of command domains multiplexed over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    Pcm = 0,
    Codec = 1,
    Effect = 2,
    Position0 = 3,
    Position1 = 4,
    Position2 = 5,
    Position3 = 6,
    Position4 = 7,
    Position5 = 8,
    Position6 = 9,
    Position7 = 10,
    Position8 = 11,
}

/// Number of playback position streams.
pub const NUM_POSITION_STREAMS: usize = 9;

impl CommandType {
    pub const COUNT: usize = 12;

    pub fn from_wire(code: u8) -> Result<Self, Error> {
        use CommandType::*;
        match code {
            0 => Ok(Pcm),
            1 => Ok(Codec),
            2 => Ok(Effect),
            3 => Ok(Position0),
            4 => Ok(Position1),
            5 => Ok(Position2),
            6 => Ok(Position3),
            7 => Ok(Position4),
            8 => Ok(Position5),
            9 => Ok(Position6),
            10 => Ok(Position7),
            11 => Ok(Position8),
            other => Err(Error::BadCommandType(other)),
        }
    }

    /// The position command type for playback stream `stream` (0..=8).
    pub fn position(stream: usize) -> Option<Self> {
        if stream < NUM_POSITION_STREAMS {
            // position codes are contiguous starting at Position0
            Self::from_wire(CommandType::Position0 as u8 + stream as u8).ok()
        } else {
            None
        }
    }

    /// The stream index if this is a position command type.
    pub fn position_stream(self) -> Option<usize> {
        let code = self as u8;
        if code >= CommandType::Position0 as u8 {
            Some((code - CommandType::Position0 as u8) as usize)
        } else {
            None
        }
    }
}

/// An owned, bounds-checked payload of up to [`MAX_PAYLOAD_WORDS`] words.
#[derive(Clone, Copy)]
pub struct Payload {
    words: [u32; MAX_PAYLOAD_WORDS],
    len: u8,
}

impl Payload {
    pub const fn empty() -> Self {
        Payload {
            words: [0; MAX_PAYLOAD_WORDS],
            len: 0,
        }
    }

    pub fn copy_from(words: &[u32]) -> Result<Self, Error> {
        if words.len() > MAX_PAYLOAD_WORDS {
            return Err(Error::PayloadTooLong(words.len()));
        }
        let mut payload = Payload::empty();
        payload.words[..words.len()].copy_from_slice(words);
        payload.len = words.len() as u8;
        Ok(payload)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.words[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Payload {}

/// One decoded command/reply unit.
///
/// `slot` is the 8-bit correlation token echoed by the remote for
/// REQUEST/REPLY pairs; it is 0 and meaningless for SET frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub usage: Usage,
    pub core: Core,
    pub cmd_type: CommandType,
    pub slot: u8,
    pub payload: Payload,
}

impl Frame {
    pub fn new(
        usage: Usage,
        core: Core,
        cmd_type: CommandType,
        slot: u8,
        payload: &[u32],
    ) -> Result<Self, Error> {
        Ok(Frame {
            usage,
            core,
            cmd_type,
            slot,
            payload: Payload::copy_from(payload)?,
        })
    }

    /// Serializes into a wire buffer. Never partially writes; the payload
    /// area past `payload.len()` is zeroed.
    pub fn to_wire(&self) -> WireBuffer {
        let mut buf: WireBuffer = [0; FRAME_WORDS];
        buf[0] = self.usage.to_wire(self.core) << 24
            | (self.cmd_type as u32) << 16
            | (self.slot as u32) << 8
            | self.payload.len() as u32;
        buf[1..1 + self.payload.len()].copy_from_slice(self.payload.as_slice());
        buf
    }

    /// Deserializes a wire buffer, validating usage, command type and payload
    /// length before any payload word is trusted.
    pub fn from_wire(buf: &WireBuffer) -> Result<Self, Error> {
        let header = buf[0];
        let (usage, core) = Usage::from_wire((header >> 24) as u8)?;
        let cmd_type = CommandType::from_wire((header >> 16) as u8)?;
        let slot = (header >> 8) as u8;
        let len = header as u8;
        if len as usize > MAX_PAYLOAD_WORDS {
            return Err(Error::BadPayloadLength(len));
        }
        Ok(Frame {
            usage,
            core,
            cmd_type,
            slot,
            payload: Payload::copy_from(&buf[1..1 + len as usize])
                .expect("length already validated"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let frame = Frame::new(
            Usage::Request,
            Core::Main,
            CommandType::Codec,
            0x2a,
            &[0xdead_beef, 7, 0],
        )
        .unwrap();
        assert_eq!(Frame::from_wire(&frame.to_wire()), Ok(frame));
    }

    #[test]
    fn round_trip_max_payload() {
        let words: Vec<u32> = (0..MAX_PAYLOAD_WORDS as u32).collect();
        let frame =
            Frame::new(Usage::Set, Core::Sub, CommandType::Position8, 0, &words).unwrap();
        let decoded = Frame::from_wire(&frame.to_wire()).unwrap();
        assert_eq!(decoded.payload.as_slice(), &words[..]);
    }

    #[test]
    fn round_trip_empty_payload() {
        let frame = Frame::new(Usage::Set, Core::Main, CommandType::Pcm, 0, &[]).unwrap();
        let decoded = Frame::from_wire(&frame.to_wire()).unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn payload_too_long() {
        let words = [0u32; MAX_PAYLOAD_WORDS + 1];
        assert_eq!(
            Frame::new(Usage::Set, Core::Main, CommandType::Pcm, 0, &words),
            Err(Error::PayloadTooLong(MAX_PAYLOAD_WORDS + 1))
        );
    }

    #[test]
    fn rejects_unknown_usage() {
        let mut buf: WireBuffer = [0; FRAME_WORDS];
        buf[0] = 0x7 << 24;
        assert_eq!(Frame::from_wire(&buf), Err(Error::BadUsage(7)));
    }

    #[test]
    fn rejects_unknown_command_type() {
        let mut buf: WireBuffer = [0; FRAME_WORDS];
        buf[0] = 1 << 24 | 12 << 16;
        assert_eq!(Frame::from_wire(&buf), Err(Error::BadCommandType(12)));
    }

    #[test]
    fn header_bit_layout() {
        let frame =
            Frame::new(Usage::Reply, Core::Main, CommandType::Effect, 5, &[1, 2]).unwrap();
        assert_eq!(frame.to_wire()[0], 0x03_02_05_02);
    }

    #[test]
    fn position_stream_mapping() {
        assert_eq!(CommandType::position(0), Some(CommandType::Position0));
        assert_eq!(CommandType::position(8), Some(CommandType::Position8));
        assert_eq!(CommandType::position(9), None);
        assert_eq!(CommandType::Position3.position_stream(), Some(3));
        assert_eq!(CommandType::Codec.position_stream(), None);
    }
}
