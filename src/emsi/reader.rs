//! Character reader (spec §4.5): a buffered, single-byte pull interface
//! with XON/XOFF stripping, a carrier-loss watchdog, and banner capture.
//! Layered directly on a [`Transport`]; the token recognizer (§4.6) and
//! DAT reader (§4.7) are the only consumers.

use crate::error::{Error, Result};
use crate::transport::{TestContext, Transport};
use buf_redux::BufReader;
use std::io::Read;
use std::time::{Duration, Instant};

/// Cap on the accumulated banner text (spec §4.5 "a few KiB").
const BANNER_CAP: usize = 4096;
/// How much of the current, not-yet-terminated line we keep around to
/// test against the carrier-loss phrase list.
const MAX_LINE_BUF: usize = 256;

const CARRIER_LOST_PHRASES: &[&str] = &["NO CARRIER", "BUSY", "NO DIALTONE", "NO ANSWER"];

pub struct CharReader<T> {
    inner: BufReader<T>,
    pending: Option<u8>,
    carrier_lost: bool,
    any_byte_delivered: bool,
    line_buf: Vec<u8>,
    banner: Vec<u8>,
    token_seen: bool,
}

impl<T: Transport> CharReader<T> {
    pub fn new(transport: T) -> CharReader<T> {
        CharReader {
            inner: BufReader::new(transport),
            pending: None,
            carrier_lost: false,
            any_byte_delivered: false,
            line_buf: Vec::new(),
            banner: Vec::new(),
            token_seen: false,
        }
    }

    /// Read one byte, bounded by both a per-character timeout and an
    /// absolute `master_deadline`. XON (0x11) and XOFF (0x13) bytes are
    /// consumed and never delivered.
    ///
    /// `ctx` is polled once per per-character tick (spec §9 "cancellation
    /// must reach the innermost read"), not merely once per whole token or
    /// DAT frame, so a cancellation signal fired mid-wait is observed
    /// within one tick rather than only after the in-flight read times out.
    pub fn getchar(&mut self, per_char_timeout: Duration, ctx: &TestContext, master_deadline: Instant) -> Result<u8> {
        if self.carrier_lost {
            return Err(Error::CarrierLost);
        }
        if let Some(b) = self.pending.take() {
            return Ok(b);
        }
        loop {
            ctx.check()?;
            let now = Instant::now();
            if now >= master_deadline {
                return Err(Error::Timeout);
            }
            let budget = std::cmp::min(per_char_timeout, master_deadline - now);
            self.inner.get_mut().set_read_timeout(Some(budget))?;
            let mut byte = [0u8; 1];
            match self.inner.read(&mut byte) {
                Ok(0) => {
                    return if self.any_byte_delivered {
                        self.carrier_lost = true;
                        Err(Error::CarrierLost)
                    } else {
                        Err(Error::Eof)
                    };
                }
                Ok(_) => {
                    self.any_byte_delivered = true;
                    let b = byte[0];
                    if b == 0x11 || b == 0x13 {
                        continue; // XON/XOFF: silently stripped
                    }
                    self.observe(b);
                    if self.carrier_lost {
                        return Err(Error::CarrierLost);
                    }
                    return Ok(b);
                }
                Err(e) => {
                    return match e.kind() {
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                            Err(Error::Timeout)
                        }
                        _ if self.any_byte_delivered => {
                            self.carrier_lost = true;
                            Err(Error::CarrierLost)
                        }
                        _ => Err(Error::Io(e)),
                    };
                }
            }
        }
    }

    /// Push one byte back so the next `getchar` returns it again. Used by
    /// the token recognizer to "peek" the byte following a token.
    pub fn ungetchar(&mut self, b: u8) {
        self.pending = Some(b);
    }

    /// Direct write access to the underlying transport. The handshake
    /// engine sends tokens and DAT frames through this while reading
    /// responses through `getchar`.
    pub fn writer_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Tell the reader an EMSI token has been recognized, so it stops
    /// growing the banner buffer from this point on.
    pub fn note_token_seen(&mut self) {
        self.token_seen = true;
    }

    pub fn banner_text(&self) -> String {
        String::from_utf8_lossy(&self.banner).to_string()
    }

    pub fn carrier_lost(&self) -> bool {
        self.carrier_lost
    }

    fn observe(&mut self, b: u8) {
        if !self.token_seen && self.banner.len() < BANNER_CAP {
            self.banner.push(b);
        }
        if b == b'\r' || b == b'\n' {
            let line = String::from_utf8_lossy(&self.line_buf);
            let trimmed = line.trim();
            if CARRIER_LOST_PHRASES.contains(&trimmed) {
                self.carrier_lost = true;
            }
            self.line_buf.clear();
        } else {
            self.line_buf.push(b);
            if self.line_buf.len() > MAX_LINE_BUF {
                let excess = self.line_buf.len() - MAX_LINE_BUF;
                self.line_buf.drain(0..excess);
            }
        }
    }
}
