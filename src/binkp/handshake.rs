//! BinkP handshake driver (spec §4.9): identity-only, caller role.
//!
//! Sends our `M_NUL`/`M_ADR`/`M_PWD` frames, then reads frames until a
//! terminal one arrives, capped at [`MAX_FRAMES`] to bound a runaway peer.

use super::frame::{Frame, FrameKind};
use super::RemoteNodeInfo;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::binkp_verbose;
use crate::transport::{TestContext, Transport};
use std::time::{Duration, Instant};

/// Runaway-peer backstop: we never read more than this many frames while
/// waiting for a terminal one.
pub const MAX_FRAMES: usize = 50;

/// How long we wait for the peer's best-effort `M_EOB` on close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub struct LocalIdentity {
    pub system_name: String,
    pub sysop: String,
    pub location: String,
    pub address: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinkpOutcome {
    pub info: RemoteNodeInfo,
}

/// Drive one BinkP session to completion, always as caller.
pub fn run_handshake<T: Transport>(
    transport: &mut T,
    ctx: &TestContext,
    local: &LocalIdentity,
    cfg: &Config,
) -> Result<BinkpOutcome> {
    send_identity(transport, ctx, local)?;
    tracing::debug!("binkp: sent identity frames");

    let mut info = RemoteNodeInfo::default();
    let mut received_adr = false;

    for _ in 0..MAX_FRAMES {
        ctx.check()?;
        let step_deadline = std::cmp::min(Instant::now() + cfg.session_timeout, ctx.deadline());
        let frame = match Frame::decode_interruptible(transport, ctx, step_deadline) {
            Ok(f) => f,
            Err(Error::Eof) if received_adr => {
                // Clean EOF after M_ADR: treat as success (spec §4.9).
                tracing::debug!("binkp: clean eof after m_adr, treating as success");
                return Ok(BinkpOutcome { info });
            }
            Err(Error::Eof) => {
                tracing::warn!("binkp: eof before m_adr");
                return Err(Error::CarrierLost);
            }
            Err(e) => {
                tracing::warn!(error = %e, "binkp: frame decode failed");
                return Err(e);
            }
        };

        if !frame.is_command {
            continue;
        }

        if binkp_verbose() {
            tracing::trace!(kind = ?frame.kind, len = frame.payload.len(), "binkp: command frame");
        }

        match frame.kind {
            FrameKind::Nul => {
                let payload = String::from_utf8_lossy(&frame.payload);
                info.apply_nul(&payload);
            }
            FrameKind::Adr => {
                let payload = String::from_utf8_lossy(&frame.payload);
                info.apply_adr(&payload);
                received_adr = true;
            }
            FrameKind::Pwd => {
                info.password = String::from_utf8_lossy(&frame.payload).to_string();
            }
            FrameKind::Ok => {
                return Ok(BinkpOutcome { info });
            }
            FrameKind::Eob => {
                return Ok(BinkpOutcome { info });
            }
            FrameKind::Err => {
                let detail = String::from_utf8_lossy(&frame.payload).to_string();
                tracing::warn!(detail = %detail, "binkp: remote sent m_err");
                return Err(Error::RemoteError(detail));
            }
            FrameKind::Bsy => {
                tracing::warn!("binkp: remote sent m_bsy");
                return Err(Error::RemoteBusy);
            }
            _ => {}
        }

        // Early-exit shortcut (spec §4.9): some peers never send M_OK.
        if received_adr && !info.system_name.is_empty() {
            return Ok(BinkpOutcome { info });
        }
    }

    tracing::warn!("binkp: exceeded {} frames without a terminal frame", MAX_FRAMES);
    Err(Error::Timeout)
}

fn send_identity<T: Transport>(transport: &mut T, ctx: &TestContext, local: &LocalIdentity) -> Result<()> {
    Frame::command(FrameKind::Nul, format!("SYS {}", local.system_name)).write_to_bounded(transport, ctx)?;
    Frame::command(FrameKind::Nul, format!("ZYZ {}", local.sysop)).write_to_bounded(transport, ctx)?;
    Frame::command(FrameKind::Nul, format!("LOC {}", local.location)).write_to_bounded(transport, ctx)?;
    Frame::command(FrameKind::Nul, "VER fidonet-probe".to_string()).write_to_bounded(transport, ctx)?;
    Frame::command(FrameKind::Nul, "TIME -".to_string()).write_to_bounded(transport, ctx)?;
    for cap in &local.capabilities {
        Frame::command(FrameKind::Nul, format!("OPT {}", cap)).write_to_bounded(transport, ctx)?;
    }
    Frame::command(FrameKind::Adr, local.address.clone()).write_to_bounded(transport, ctx)?;
    Frame::command(FrameKind::Pwd, "-".to_string()).write_to_bounded(transport, ctx)?;
    Ok(())
}

/// Best-effort graceful close: send `M_EOB`, wait briefly for the peer's
/// own `M_EOB`, then let the caller drop the socket (spec §4.9 "Close").
pub fn close<T: Transport>(transport: &mut T) {
    let _ = transport.set_write_timeout(Some(CLOSE_GRACE));
    let _ = Frame::command(FrameKind::Eob, Vec::new()).write_to(transport);
    let _ = transport.set_read_timeout(Some(CLOSE_GRACE));
    loop {
        match Frame::decode(transport) {
            Ok(f) if f.is_command && f.kind == FrameKind::Eob => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockDuplex;

    fn local() -> LocalIdentity {
        LocalIdentity {
            system_name: "Prober".to_string(),
            sysop: "Probe Op".to_string(),
            location: "Nowhere".to_string(),
            address: "2:9999/9999".to_string(),
            capabilities: vec!["CRAM-MD5-abcd".to_string()],
        }
    }

    fn frame_bytes(kind: FrameKind, payload: &str) -> Vec<u8> {
        Frame::command(kind, payload.to_string()).encode().unwrap()
    }

    /// S5: peer sends M_NUL(SYS=X), M_ADR, then closes without M_OK.
    #[test]
    fn s5_early_exit_on_clean_eof() {
        let mut inbound = Vec::new();
        inbound.extend(frame_bytes(FrameKind::Nul, "SYS X"));
        inbound.extend(frame_bytes(FrameKind::Adr, "2:5001/100"));
        let mut duplex = MockDuplex::new(inbound);
        let ctx = TestContext::with_timeout(Duration::from_secs(5));
        let cfg = Config::default();

        let outcome = run_handshake(&mut duplex, &ctx, &local(), &cfg).unwrap();
        assert_eq!(outcome.info.system_name, "X");
        assert_eq!(outcome.info.addresses, vec!["2:5001/100"]);
    }

    #[test]
    fn completes_on_m_ok() {
        let mut inbound = Vec::new();
        inbound.extend(frame_bytes(FrameKind::Nul, "SYS Y"));
        inbound.extend(frame_bytes(FrameKind::Adr, "2:5001/200"));
        inbound.extend(Frame::command(FrameKind::Ok, Vec::new()).encode().unwrap());
        let mut duplex = MockDuplex::new(inbound);
        let ctx = TestContext::with_timeout(Duration::from_secs(5));
        let cfg = Config::default();

        let outcome = run_handshake(&mut duplex, &ctx, &local(), &cfg).unwrap();
        assert_eq!(outcome.info.addresses, vec!["2:5001/200"]);
    }

    #[test]
    fn completes_on_m_eob_with_no_files() {
        let mut inbound = Vec::new();
        inbound.extend(frame_bytes(FrameKind::Adr, "2:5001/300"));
        inbound.extend(Frame::command(FrameKind::Eob, Vec::new()).encode().unwrap());
        let mut duplex = MockDuplex::new(inbound);
        let ctx = TestContext::with_timeout(Duration::from_secs(5));
        let cfg = Config::default();

        let outcome = run_handshake(&mut duplex, &ctx, &local(), &cfg).unwrap();
        assert_eq!(outcome.info.addresses, vec!["2:5001/300"]);
    }

    #[test]
    fn m_err_surfaces_remote_error() {
        let inbound = frame_bytes(FrameKind::Err, "too busy");
        let mut duplex = MockDuplex::new(inbound);
        let ctx = TestContext::with_timeout(Duration::from_secs(5));
        let cfg = Config::default();

        let err = run_handshake(&mut duplex, &ctx, &local(), &cfg).unwrap_err();
        assert!(matches!(err, Error::RemoteError(ref s) if s == "too busy"));
    }

    #[test]
    fn m_bsy_surfaces_remote_busy() {
        let inbound = Frame::command(FrameKind::Bsy, Vec::new()).encode().unwrap();
        let mut duplex = MockDuplex::new(inbound);
        let ctx = TestContext::with_timeout(Duration::from_secs(5));
        let cfg = Config::default();

        let err = run_handshake(&mut duplex, &ctx, &local(), &cfg).unwrap_err();
        assert!(matches!(err, Error::RemoteBusy));
    }

    /// A cancellation fired before the peer ever speaks surfaces
    /// immediately rather than waiting out `session_timeout` (spec §5, §9
    /// "cancellation must reach the innermost read").
    #[test]
    fn cancelled_context_aborts_handshake() {
        let mut duplex = MockDuplex::new(Vec::new());
        let ctx = TestContext::with_timeout(Duration::from_secs(30));
        ctx.canceller().store(true, std::sync::atomic::Ordering::Release);
        let cfg = Config::default();

        let err = run_handshake(&mut duplex, &ctx, &local(), &cfg).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn sends_identity_in_order_before_reading() {
        let mut duplex = MockDuplex::new(Frame::command(FrameKind::Ok, Vec::new()).encode().unwrap());
        let ctx = TestContext::with_timeout(Duration::from_secs(5));
        let cfg = Config::default();
        run_handshake(&mut duplex, &ctx, &local(), &cfg).unwrap();

        let mut cursor = std::io::Cursor::new(duplex.outbound);
        let first = Frame::decode(&mut cursor).unwrap();
        assert_eq!(first.kind, FrameKind::Nul);
        assert!(String::from_utf8_lossy(&first.payload).starts_with("SYS "));
    }
}
