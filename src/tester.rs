//! Tester façade (spec §4.12, §6): dials a host, drives the protocol's
//! handshake, and reduces the outcome to a [`TestResult`]. This is the
//! only module that touches a live [`TcpStream`]; every protocol engine
//! above it is transport-agnostic.

use crate::address::normalize;
use crate::binkp;
use crate::config::ConfigManager;
use crate::emsi;
use crate::error::Error;
use crate::result::{CompletionReason, SoftwareSource, TestResult};
use crate::transport::{TestContext, Transport};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_BINKP_PORT: u16 = 24554;
pub const DEFAULT_IFCICO_PORT: u16 = 60179;

/// One probe engine: dial, handshake, reduce to a [`TestResult`].
pub trait ProtocolTester {
    fn test(
        &self,
        ctx: &TestContext,
        host: &str,
        port: Option<u16>,
        expected_address: Option<&str>,
    ) -> TestResult;
}

/// Append `default_port` to `host` unless a port is already present,
/// either explicitly (`port`) or embedded in `host` (`"host:port"`,
/// `"[::1]:port"`).
fn with_port(host: &str, port: Option<u16>, default_port: u16) -> (String, u16) {
    if let Some(p) = port {
        return (format!("{}:{}", host, p), p);
    }
    if let Some(bracket_end) = host.strip_prefix('[').and_then(|_| host.find("]:")) {
        let port_str = &host[bracket_end + 2..];
        if let Ok(p) = port_str.parse() {
            return (host.to_string(), p);
        }
    }
    if host.matches(':').count() == 1 {
        if let Some((_, port_str)) = host.rsplit_once(':') {
            if let Ok(p) = port_str.parse() {
                return (host.to_string(), p);
            }
        }
    }
    (format!("{}:{}", host, default_port), default_port)
}

fn dial(target: &str, timeout: std::time::Duration) -> crate::Result<TcpStream> {
    let mut addrs = target
        .to_socket_addrs()
        .map_err(Error::ConnectFailed)?;
    let addr = addrs.next().ok_or_else(|| {
        Error::ConnectFailed(io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))
    })?;
    TcpStream::connect_timeout(&addr, timeout).map_err(Error::ConnectFailed)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn address_valid(addresses: &[String], expected: Option<&str>) -> bool {
    match expected {
        Some(exp) => addresses.iter().any(|a| normalize(a) == normalize(exp)),
        None => true,
    }
}

/// BinkP (FTS-1026) prober: identity-only, no file phase (spec §1).
pub struct BinkpTester {
    pub config: Arc<ConfigManager>,
    pub local: binkp::handshake::LocalIdentity,
}

impl ProtocolTester for BinkpTester {
    fn test(
        &self,
        ctx: &TestContext,
        host: &str,
        port: Option<u16>,
        expected_address: Option<&str>,
    ) -> TestResult {
        let started = Instant::now();
        let (target, resolved_port) = with_port(host, port, DEFAULT_BINKP_PORT);
        let cfg = self.config.get(expected_address.unwrap_or(host));

        if let Err(e) = ctx.check() {
            return TestResult::failure(resolved_port, started.elapsed(), e);
        }
        let mut stream = match dial(&target, ctx.remaining()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "binkp: dial failed");
                return TestResult::failure(resolved_port, started.elapsed(), e);
            }
        };
        tracing::debug!(target = %target, "binkp: connected");

        let outcome = binkp::run_handshake(&mut stream, ctx, &self.local, &cfg);
        binkp::handshake::close(&mut stream);

        match outcome {
            Ok(o) => {
                let addresses = o.info.addresses.clone();
                TestResult {
                    success: true,
                    error: None,
                    response_ms: started.elapsed().as_millis() as u64,
                    system_name: non_empty(&o.info.system_name),
                    sysop: non_empty(&o.info.sysop),
                    location: non_empty(&o.info.location),
                    version: non_empty(&o.info.version),
                    mailer_info: non_empty(&o.info.version),
                    address_valid: address_valid(&addresses, expected_address),
                    addresses,
                    capabilities: o.info.capabilities,
                    port: resolved_port,
                    software_source: SoftwareSource::EmsiDat.as_str(),
                }
            }
            Err(e) => TestResult::failure(resolved_port, started.elapsed(), e),
        }
    }
}

/// EMSI/IFCICO prober (FSC-0056/FSC-0088).
pub struct IfcicoTester {
    pub config: Arc<ConfigManager>,
    pub local: emsi::LocalIdentity,
}

impl ProtocolTester for IfcicoTester {
    fn test(
        &self,
        ctx: &TestContext,
        host: &str,
        port: Option<u16>,
        expected_address: Option<&str>,
    ) -> TestResult {
        let started = Instant::now();
        let (target, resolved_port) = with_port(host, port, DEFAULT_IFCICO_PORT);
        let cfg = self.config.get(expected_address.unwrap_or(host));

        if let Err(e) = ctx.check() {
            return TestResult::failure(resolved_port, started.elapsed(), e);
        }
        let stream = match dial(&target, ctx.remaining()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "ifcico: dial failed");
                return TestResult::failure(resolved_port, started.elapsed(), e);
            }
        };
        tracing::debug!(target = %target, "ifcico: connected");

        let (reason, info) = emsi::run_handshake(stream, ctx, &self.local, &cfg);
        let response_ms = started.elapsed().as_millis() as u64;

        if !reason.is_success() {
            let error = match reason {
                CompletionReason::Timeout => "handshake timed out".to_string(),
                CompletionReason::CarrierLost => "carrier lost".to_string(),
                CompletionReason::RetryExhausted => "retries exhausted".to_string(),
                CompletionReason::Cancelled => "cancelled".to_string(),
                CompletionReason::RemoteError(detail) => format!("remote error: {detail}"),
                CompletionReason::Success | CompletionReason::SuccessNcp | CompletionReason::BannerOnly => {
                    unreachable!("is_success() already filtered these out")
                }
            };
            return TestResult::failure(resolved_port, started.elapsed(), error);
        }

        if let Some(emsi_data) = info.emsi {
            let addresses: Vec<String> = emsi_data.addresses.iter().map(|a| a.to_string()).collect();
            let ident = emsi_data.ident.clone();
            TestResult {
                success: true,
                error: None,
                response_ms,
                system_name: ident.as_ref().map(|i| i.system.clone()).filter(|s| !s.is_empty()),
                sysop: ident.as_ref().map(|i| i.sysop.clone()).filter(|s| !s.is_empty()),
                location: ident.as_ref().map(|i| i.location.clone()).filter(|s| !s.is_empty()),
                version: non_empty(&emsi_data.mailer_version),
                mailer_info: non_empty(&format!(
                    "{} {}",
                    emsi_data.mailer_name, emsi_data.mailer_version
                )),
                address_valid: address_valid(&addresses, expected_address),
                addresses,
                capabilities: emsi_data.compat_codes.protocols.clone(),
                port: resolved_port,
                software_source: SoftwareSource::EmsiDat.as_str(),
            }
        } else if let Some(software) = info.banner_software {
            TestResult {
                success: true,
                error: None,
                response_ms,
                system_name: None,
                sysop: None,
                location: None,
                version: non_empty(&software.version),
                mailer_info: non_empty(&format!("{} {}", software.name, software.version)),
                address_valid: expected_address.is_none(),
                addresses: Vec::new(),
                capabilities: Vec::new(),
                port: resolved_port,
                software_source: SoftwareSource::Banner.as_str(),
            }
        } else {
            TestResult::failure(resolved_port, started.elapsed(), "handshake completed with no data")
        }
    }
}
