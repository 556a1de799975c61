//! BinkP frame codec (spec §4.2, FTS-1026).
//!
//! Wire form: a 2-byte big-endian header followed by `length` bytes of
//! payload. The header's top bit marks a command frame; the low 15 bits
//! carry the payload length, so a single frame's payload can never exceed
//! `MAX_PAYLOAD` bytes.

use crate::error::{Error, Result};
use crate::transport::{write_bounded, TestContext, Transport};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Top bit of the 16-bit header.
const COMMAND_FLAG: u16 = 0x8000;
/// Largest payload (including the kind byte, for command frames) a single
/// frame can carry.
pub const MAX_PAYLOAD: usize = 0x7FFF;

/// How often [`Frame::decode_interruptible`]'s inner read loop re-checks
/// the context's cancellation flag (spec §5, §9 "cancellation must reach
/// the innermost read").
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The set of BinkP frame kinds this crate sends or recognizes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Nul,
    Adr,
    Pwd,
    File,
    Ok,
    Eob,
    Got,
    Err,
    Bsy,
    Get,
    Skip,
    Unknown(u8),
}

impl From<u8> for FrameKind {
    fn from(b: u8) -> Self {
        match b {
            0 => FrameKind::Nul,
            1 => FrameKind::Adr,
            2 => FrameKind::Pwd,
            3 => FrameKind::File,
            4 => FrameKind::Ok,
            5 => FrameKind::Eob,
            6 => FrameKind::Got,
            7 => FrameKind::Err,
            8 => FrameKind::Bsy,
            9 => FrameKind::Get,
            10 => FrameKind::Skip,
            other => FrameKind::Unknown(other),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Nul => 0,
            FrameKind::Adr => 1,
            FrameKind::Pwd => 2,
            FrameKind::File => 3,
            FrameKind::Ok => 4,
            FrameKind::Eob => 5,
            FrameKind::Got => 6,
            FrameKind::Err => 7,
            FrameKind::Bsy => 8,
            FrameKind::Get => 9,
            FrameKind::Skip => 10,
            FrameKind::Unknown(b) => b,
        }
    }
}

/// A single decoded (or about-to-be-encoded) BinkP frame.
///
/// For command frames, `kind` is the first payload byte and `payload`
/// holds only the remaining argument bytes. For data frames `kind` is
/// meaningless (`FrameKind::Nul`, i.e. 0) and `payload` is the raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub is_command: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn command(kind: FrameKind, args: impl Into<Vec<u8>>) -> Frame {
        Frame {
            kind,
            is_command: true,
            payload: args.into(),
        }
    }

    pub fn data(payload: impl Into<Vec<u8>>) -> Frame {
        Frame {
            kind: FrameKind::Nul,
            is_command: false,
            payload: payload.into(),
        }
    }

    /// Encode this frame as wire bytes.
    ///
    /// Fails with [`Error::FrameTooLarge`] if the combined kind byte (for
    /// command frames) plus arguments would exceed [`MAX_PAYLOAD`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire_payload: Vec<u8> = if self.is_command {
            let mut v = Vec::with_capacity(1 + self.payload.len());
            v.push(self.kind.into());
            v.extend_from_slice(&self.payload);
            v
        } else {
            self.payload.clone()
        };
        if wire_payload.len() > MAX_PAYLOAD {
            return Err(Error::FrameTooLarge(wire_payload.len()));
        }
        let mut header = wire_payload.len() as u16;
        if self.is_command {
            header |= COMMAND_FLAG;
        }
        let mut out = Vec::with_capacity(2 + wire_payload.len());
        out.write_u16::<BigEndian>(header)?;
        out.extend_from_slice(&wire_payload);
        Ok(out)
    }

    /// Write this frame's wire encoding directly to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let bytes = self.encode()?;
        w.write_all(&bytes)?;
        Ok(())
    }

    /// Write this frame, bounded by `ctx`'s remaining budget (spec §5
    /// "byte write (with write deadline)").
    pub fn write_to_bounded<T: Transport>(&self, transport: &mut T, ctx: &TestContext) -> Result<()> {
        let bytes = self.encode()?;
        write_bounded(transport, ctx, &bytes)
    }

    /// Read one frame from `r`.
    ///
    /// [`Error::Eof`] if the stream ends before any header byte is read;
    /// [`Error::ShortRead`] if it ends partway through the header or
    /// payload.
    pub fn decode<R: Read>(r: &mut R) -> Result<Frame> {
        let mut header_bytes = [0u8; 2];
        let n = read_partial(r, &mut header_bytes)?;
        if n == 0 {
            return Err(Error::Eof);
        }
        if n < 2 {
            return Err(Error::ShortRead);
        }
        let header = u16::from_be_bytes(header_bytes);
        let is_command = header & COMMAND_FLAG != 0;
        let length = (header & !COMMAND_FLAG) as usize;
        let mut payload = vec![0u8; length];
        if length > 0 {
            r.read_exact(&mut payload).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::ShortRead
                } else {
                    Error::Io(e)
                }
            })?;
        }
        frame_from_parts(is_command, payload)
    }

    /// Read one frame from `transport`, re-checking `ctx`'s cancellation
    /// flag every [`POLL_INTERVAL`] tick rather than once per whole frame
    /// (spec §5, §9: cancellation must reach the innermost read), bounded
    /// overall by `deadline`.
    pub fn decode_interruptible<T: Transport>(
        transport: &mut T,
        ctx: &TestContext,
        deadline: Instant,
    ) -> Result<Frame> {
        let mut header_bytes = [0u8; 2];
        let n = read_interruptible(transport, ctx, deadline, &mut header_bytes)?;
        if n == 0 {
            return Err(Error::Eof);
        }
        if n < 2 {
            return Err(Error::ShortRead);
        }
        let header = u16::from_be_bytes(header_bytes);
        let is_command = header & COMMAND_FLAG != 0;
        let length = (header & !COMMAND_FLAG) as usize;
        let mut payload = vec![0u8; length];
        if length > 0 {
            let n = read_interruptible(transport, ctx, deadline, &mut payload)?;
            if n < length {
                return Err(Error::ShortRead);
            }
        }
        frame_from_parts(is_command, payload)
    }
}

fn frame_from_parts(is_command: bool, mut payload: Vec<u8>) -> Result<Frame> {
    if is_command {
        if payload.is_empty() {
            return Err(Error::ShortRead);
        }
        let kind = FrameKind::from(payload.remove(0));
        Ok(Frame {
            kind,
            is_command: true,
            payload,
        })
    } else {
        Ok(Frame {
            kind: FrameKind::Nul,
            is_command: false,
            payload,
        })
    }
}

/// Read into `buf`, returning how many bytes were actually available
/// before EOF (unlike `read_exact`, which errors on a short read).
fn read_partial<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// Like [`read_partial`], but ticks in [`POLL_INTERVAL`] slices so
/// `ctx.check()` runs between reads instead of blocking for an entire
/// header/payload under one uninterruptible `set_read_timeout`.
fn read_interruptible<T: Transport>(
    transport: &mut T,
    ctx: &TestContext,
    deadline: Instant,
    buf: &mut [u8],
) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        ctx.check()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        let tick = std::cmp::min(remaining, POLL_INTERVAL);
        transport.set_read_timeout(Some(std::cmp::max(tick, Duration::from_millis(1))))?;
        match transport.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockDuplex;
    use std::io::Cursor;

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn ctx() -> TestContext {
        TestContext::with_timeout(Duration::from_secs(60))
    }

    #[test]
    fn roundtrip_command_frame() {
        let frame = Frame::command(FrameKind::Nul, b"SYS Test BBS".to_vec());
        let bytes = frame.encode().unwrap();
        let mut cur = Cursor::new(bytes);
        let decoded = Frame::decode(&mut cur).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn roundtrip_data_frame() {
        let frame = Frame::data(b"hello".to_vec());
        let bytes = frame.encode().unwrap();
        let mut cur = Cursor::new(bytes);
        let decoded = Frame::decode(&mut cur).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.kind, FrameKind::Nul);
        assert!(!decoded.is_command);
    }

    #[test]
    fn header_encodes_command_flag_and_length() {
        let frame = Frame::command(FrameKind::Adr, b"2:5001/100".to_vec());
        let bytes = frame.encode().unwrap();
        let header = u16::from_be_bytes([bytes[0], bytes[1]]);
        assert_ne!(header & COMMAND_FLAG, 0);
        assert_eq!((header & !COMMAND_FLAG) as usize, bytes.len() - 2);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let frame = Frame::data(vec![0u8; MAX_PAYLOAD + 1]);
        assert!(matches!(frame.encode(), Err(Error::FrameTooLarge(_))));
    }

    #[test]
    fn decode_on_empty_stream_is_eof() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        assert!(matches!(Frame::decode(&mut cur), Err(Error::Eof)));
    }

    #[test]
    fn decode_on_truncated_header_is_short_read() {
        let mut cur = Cursor::new(vec![0x80u8]);
        assert!(matches!(Frame::decode(&mut cur), Err(Error::ShortRead)));
    }

    #[test]
    fn decode_on_truncated_payload_is_short_read() {
        let mut header = 5u16.to_be_bytes().to_vec();
        header.extend_from_slice(b"ab");
        let mut cur = Cursor::new(header);
        assert!(matches!(Frame::decode(&mut cur), Err(Error::ShortRead)));
    }

    #[test]
    fn kind_roundtrips_through_u8() {
        for b in 0u8..=10 {
            let kind = FrameKind::from(b);
            assert_eq!(u8::from(kind), b);
        }
        assert_eq!(u8::from(FrameKind::from(200)), 200);
    }

    #[test]
    fn decode_interruptible_matches_decode() {
        let frame = Frame::command(FrameKind::Adr, b"2:5001/100".to_vec());
        let bytes = frame.encode().unwrap();
        let mut duplex = MockDuplex::new(bytes);
        let decoded = Frame::decode_interruptible(&mut duplex, &ctx(), far_future()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_interruptible_observes_cancellation() {
        let mut duplex = MockDuplex::new(Vec::new());
        let cancel_ctx = ctx();
        cancel_ctx.canceller().store(true, std::sync::atomic::Ordering::Release);
        let err = Frame::decode_interruptible(&mut duplex, &cancel_ctx, far_future()).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn write_to_bounded_is_bound_by_context_budget() {
        let frame = Frame::command(FrameKind::Nul, b"SYS Test".to_vec());
        let mut duplex = MockDuplex::new(Vec::new());
        frame.write_to_bounded(&mut duplex, &ctx()).unwrap();
        let mut cursor = Cursor::new(duplex.outbound);
        assert_eq!(Frame::decode(&mut cursor).unwrap(), frame);
    }
}
