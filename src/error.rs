//! Error types shared by every handshake engine in this crate.

use std::io;
use std::result;

pub type Result<T> = result::Result<T, Error>;

/// Everything that can go wrong while dialing a mailer and driving a
/// handshake against it.
///
/// Propagation policy (spec §7): `CrcMismatch`, `Nak`, and `Timeout` are
/// recoverable within a handshake's retry budget and surface as
/// [`Error::RetryExhausted`] once that budget is spent. `CarrierLost` and
/// the framing-violation variants are fatal immediately.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP dial failed.
    #[error("connect failed: {0}")]
    ConnectFailed(io::Error),

    /// A step (T1) or master (T2) deadline expired with no recoverable
    /// token received.
    #[error("handshake timed out")]
    Timeout,

    /// `NO CARRIER` / `BUSY` / `NO DIALTONE` / `NO ANSWER` was seen inline,
    /// or the underlying transport hit EOF mid-session.
    #[error("carrier lost")]
    CarrierLost,

    /// M_ERR, M_BSY, or an EMSI CLI/NAK-exhaustion from the remote peer.
    #[error("remote error: {0}")]
    RemoteError(String),

    /// The remote declared itself busy (BinkP M_BSY).
    #[error("remote busy")]
    RemoteBusy,

    /// An EMSI_DAT frame failed CRC verification.
    #[error("CRC mismatch")]
    CrcMismatch,

    /// A BinkP frame's payload would not fit in 15 bits.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Fewer bytes were available than a fixed-size read required.
    #[error("short read")]
    ShortRead,

    /// Clean end of stream with nothing read.
    #[error("end of stream")]
    Eof,

    /// An EMSI_DAT length field was not 4 hex digits.
    #[error("invalid DAT length field")]
    InvalidLength,

    /// EMSIData fields could not be fully parsed; a partial record may
    /// still be usable.
    #[error("malformed EMSI data: {0}")]
    Malformed(String),

    /// The handshake exhausted its configured retry budget.
    #[error("retries exhausted")]
    RetryExhausted,

    /// The caller's context was cancelled mid-handshake.
    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
