//! Token recognizer (spec §4.6): scans the byte stream for one of the
//! fixed EMSI token literals. The `**` prefix is never required — only
//! the bare 8-byte form (`EMSI_INQ`, etc.) is matched, so non-compliant
//! peers that skip the prefix are still recognized.

use super::reader::CharReader;
use crate::error::Error;
use crate::transport::{TestContext, Transport};
use std::time::{Duration, Instant};

/// Longest literal we scan for (`EMSI_XXX`, 8 bytes); kept a little larger
/// so the sliding window survives interleaved XON/XOFF bytes, which the
/// reader already strips before we ever see them.
const TAIL_LEN: usize = 12;

const CANDIDATES: &[(&[u8], Token)] = &[
    (b"EMSI_INQ", Token::Inq),
    (b"EMSI_REQ", Token::Req),
    (b"EMSI_ACK", Token::Ack),
    (b"EMSI_NAK", Token::Nak),
    (b"EMSI_CLI", Token::Cli),
    (b"EMSI_HBT", Token::Hbt),
    (b"EMSI_DAT", Token::Dat),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    None,
    Inq,
    Req,
    Ack,
    Nak,
    Cli,
    Hbt,
    Dat,
    Timeout,
    Carrier,
    Cancelled,
    Error,
}

/// Scan for the next EMSI token, bounded by both `step_timeout` and the
/// absolute `master_deadline`.
///
/// For any non-`DAT` match, a following CR (if any) is consumed before
/// returning. For `DAT`, returns immediately without touching the 4-hex
/// length that follows — [`super::dat::read_dat`] owns that.
pub fn read_token<T: Transport>(
    reader: &mut CharReader<T>,
    step_timeout: Duration,
    per_char_timeout: Duration,
    ctx: &TestContext,
    master_deadline: Instant,
) -> Token {
    let step_deadline = std::cmp::min(Instant::now() + step_timeout, master_deadline);
    let mut tail: Vec<u8> = Vec::with_capacity(TAIL_LEN);

    loop {
        match reader.getchar(per_char_timeout, ctx, step_deadline) {
            Ok(b) => {
                tail.push(b);
                if tail.len() > TAIL_LEN {
                    let excess = tail.len() - TAIL_LEN;
                    tail.drain(0..excess);
                }
                for (needle, token) in CANDIDATES {
                    if tail.ends_with(needle) {
                        reader.note_token_seen();
                        if *token == Token::Dat {
                            return Token::Dat;
                        }
                        consume_trailing_cr(reader, per_char_timeout, ctx, step_deadline);
                        return *token;
                    }
                }
            }
            Err(Error::Timeout) => return Token::Timeout,
            Err(Error::CarrierLost) => return Token::Carrier,
            Err(Error::Eof) => return Token::Carrier,
            Err(Error::Cancelled) => return Token::Cancelled,
            Err(_) => return Token::Error,
        }
    }
}

fn consume_trailing_cr<T: Transport>(
    reader: &mut CharReader<T>,
    per_char_timeout: Duration,
    ctx: &TestContext,
    deadline: Instant,
) {
    if let Ok(b) = reader.getchar(per_char_timeout, ctx, deadline) {
        if b != b'\r' {
            reader.ungetchar(b);
        }
    }
}
