//! The data model shared by both handshake engines and consumed by the
//! tester façade (spec §6 "Result record").

use crate::emsi::banner::SoftwareInfo;
use crate::emsi::packet::EmsiData;
use std::time::Duration;

/// How an EMSI handshake ended (spec §4.8 "Outputs").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    Success,
    SuccessNcp,
    BannerOnly,
    Timeout,
    CarrierLost,
    /// The remote's declared token/condition, e.g. `"CLI"`.
    RemoteError(String),
    RetryExhausted,
    /// The caller's context was cancelled mid-handshake (spec §5, §7).
    Cancelled,
}

impl CompletionReason {
    /// Per spec §7: success is exactly `Success`, `SuccessNcp`, or
    /// `BannerOnly`.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CompletionReason::Success | CompletionReason::SuccessNcp | CompletionReason::BannerOnly
        )
    }
}

/// Everything an EMSI handshake learned about the remote: either a fully
/// parsed `EMSIData`, banner-derived software identification, or both
/// absent on outright failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    pub emsi: Option<EmsiData>,
    pub banner_software: Option<SoftwareInfo>,
}

/// Where `mailer_info`/`software_source` on [`TestResult`] came from
/// (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareSource {
    /// Directly from the protocol's own identity exchange: a parsed
    /// EMSI_DAT, or BinkP's `M_NUL VER`. Spec §6 only names the EMSI
    /// case (`emsi_dat`) since the distilled interface predates BinkP
    /// sharing this record; BinkP's M_NUL-sourced version is tagged the
    /// same way rather than inventing a second literal.
    EmsiDat,
    Banner,
    None,
}

impl SoftwareSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SoftwareSource::EmsiDat => "emsi_dat",
            SoftwareSource::Banner => "banner",
            SoftwareSource::None => "",
        }
    }
}

/// The structured record produced by the tester façade (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TestResult {
    pub success: bool,
    pub error: Option<String>,
    pub response_ms: u64,
    pub system_name: Option<String>,
    pub sysop: Option<String>,
    pub location: Option<String>,
    pub version: Option<String>,
    pub mailer_info: Option<String>,
    pub addresses: Vec<String>,
    pub capabilities: Vec<String>,
    pub address_valid: bool,
    pub port: u16,
    pub software_source: &'static str,
}

impl TestResult {
    pub fn failure(port: u16, response_time: Duration, error: impl ToString) -> TestResult {
        TestResult {
            success: false,
            error: Some(error.to_string()),
            response_ms: response_time.as_millis() as u64,
            system_name: None,
            sysop: None,
            location: None,
            version: None,
            mailer_info: None,
            addresses: Vec::new(),
            capabilities: Vec::new(),
            address_valid: false,
            port,
            software_source: SoftwareSource::None.as_str(),
        }
    }
}
