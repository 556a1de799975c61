//! The byte-duplex abstraction both handshake engines run over, plus the
//! `TestContext` that threads a master deadline and a cancellation flag
//! down to every suspension point (spec §5, §9 "Cancellation").

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A byte-duplex transport that can bound how long the next read blocks.
///
/// `TcpStream` is the production implementation; [`testing::MockDuplex`]
/// backs the in-memory scenario tests (spec §8 S1–S7).
pub trait Transport: Read + Write {
    /// Bound how long the next read may block. Transports with no native
    /// notion of a read deadline (e.g. an in-memory buffer that is always
    /// fully available) may ignore this.
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()>;

    /// Bound how long the next write may block (spec §5 "byte write (with
    /// write deadline)"). A full peer receive window must not be able to
    /// hang a send past a handshake's own timeouts.
    fn set_write_timeout(&mut self, dur: Option<Duration>) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }
}

/// Write `bytes` to `transport`, bounded by whatever of `ctx`'s master
/// deadline remains (spec §5, §9: every suspension point, sends included,
/// must observe the context's deadline and cancellation).
pub fn write_bounded<T: Transport>(transport: &mut T, ctx: &TestContext, bytes: &[u8]) -> crate::Result<()> {
    ctx.check()?;
    transport.set_write_timeout(Some(ctx.write_budget()))?;
    transport.write_all(bytes)?;
    Ok(())
}

/// Per-probe cancellation and master-deadline state (spec §5, §9).
///
/// Languages with native `context.Context`-style cancellation propagate it
/// implicitly; this crate threads an explicit deadline and an
/// `Arc<AtomicBool>` flag instead, checked at every suspension point named
/// in spec §5 (TCP dial, byte read, byte write, inter-retry sleep).
#[derive(Clone)]
pub struct TestContext {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl TestContext {
    pub fn with_timeout(timeout: Duration) -> TestContext {
        TestContext {
            deadline: Instant::now() + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that, when `cancel()` is called on it, makes every future
    /// `is_cancelled()`/`check()` call on this context observe cancellation.
    pub fn canceller(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Budget for a single bounded write: the context's remaining time,
    /// floored at 1ms so a context that is about to expire still gets a
    /// well-formed non-zero socket timeout rather than failing to set one.
    pub fn write_budget(&self) -> Duration {
        std::cmp::max(self.remaining(), Duration::from_millis(1))
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Fail fast with [`crate::Error::Cancelled`] or
    /// [`crate::Error::Timeout`] if either condition already holds.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(crate::Error::Cancelled);
        }
        if self.is_expired() {
            return Err(crate::Error::Timeout);
        }
        Ok(())
    }
}

/// In-memory transports used by integration tests to replay fixed
/// byte sequences against the handshake engines without a live socket
/// (spec's "Test tooling" ambient concern — see `SPEC_FULL.md`).
pub mod testing {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// A duplex backed by a pre-seeded read queue and a capture buffer for
    /// writes. Never blocks: reads return whatever is queued (possibly
    /// zero bytes, signalling EOF once the queue is drained).
    #[derive(Default)]
    pub struct MockDuplex {
        inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
    }

    impl MockDuplex {
        pub fn new(inbound: impl Into<Vec<u8>>) -> MockDuplex {
            MockDuplex {
                inbound: inbound.into().into(),
                outbound: Vec::new(),
            }
        }

        /// Queue more bytes to be read later, as if the peer kept talking.
        pub fn push_inbound(&mut self, bytes: impl AsRef<[u8]>) {
            self.inbound.extend(bytes.as_ref());
        }

        pub fn outbound_str(&self) -> std::borrow::Cow<'_, str> {
            String::from_utf8_lossy(&self.outbound)
        }
    }

    impl Read for MockDuplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.inbound.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for MockDuplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl super::Transport for MockDuplex {
        fn set_read_timeout(&mut self, _dur: Option<std::time::Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_timeout(&mut self, _dur: Option<std::time::Duration>) -> io::Result<()> {
            Ok(())
        }
    }
}
