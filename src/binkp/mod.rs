//! BinkP: the length-prefixed binary FidoNet mail transport (FTS-1026).
//!
//! This module only drives the identity exchange (spec §1): dial, send our
//! identity, read the remote's `M_NUL`/`M_ADR` frames until a terminal
//! frame arrives. No file phase is implemented (non-goal, spec §1).

pub mod frame;
pub mod handshake;

pub use frame::{Frame, FrameKind, MAX_PAYLOAD};
pub use handshake::{run_handshake, BinkpOutcome};

/// Remote node identity assembled from `M_NUL`/`M_ADR`/`M_PWD` frames
/// (spec §3 "RemoteNodeInfo (BinkP)").
///
/// Invariant: after a successful handshake, `addresses` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RemoteNodeInfo {
    pub system_name: String,
    pub sysop: String,
    pub location: String,
    pub phone: String,
    pub flags: String,
    pub version: String,
    pub time: String,
    pub ndl: String,
    pub addresses: Vec<String>,
    pub capabilities: Vec<String>,
    pub password: String,
}

impl RemoteNodeInfo {
    /// Populate one field from a `M_NUL` `"KEY value"` payload. Unknown
    /// keys are ignored (spec §3, §4.9).
    pub fn apply_nul(&mut self, payload: &str) {
        let (key, value) = match payload.split_once(' ') {
            Some((k, v)) => (k, v),
            None => (payload, ""),
        };
        match key {
            "SYS" => self.system_name = value.to_string(),
            "ZYZ" => self.sysop = value.to_string(),
            "LOC" => self.location = value.to_string(),
            "PHN" => self.phone = value.to_string(),
            "FLG" => self.flags = value.to_string(),
            "VER" => self.version = value.to_string(),
            "TIME" => self.time = value.to_string(),
            "OPT" => self.capabilities.push(value.to_string()),
            "NDL" => self.ndl = value.to_string(),
            _ => {}
        }
    }

    /// Store a `M_ADR` payload's space-separated address tokens.
    pub fn apply_adr(&mut self, payload: &str) {
        self.addresses
            .extend(payload.split_whitespace().map(|s| s.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_nul_parses_known_keys() {
        let mut info = RemoteNodeInfo::default();
        info.apply_nul("SYS Example BBS");
        info.apply_nul("ZYZ Jane Sysop");
        info.apply_nul("VER binkd/1.1a");
        assert_eq!(info.system_name, "Example BBS");
        assert_eq!(info.sysop, "Jane Sysop");
        assert_eq!(info.version, "binkd/1.1a");
    }

    #[test]
    fn apply_nul_ignores_unknown_keys() {
        let mut info = RemoteNodeInfo::default();
        info.apply_nul("ZYX something");
        assert_eq!(info, RemoteNodeInfo::default());
    }

    #[test]
    fn apply_adr_splits_on_whitespace() {
        let mut info = RemoteNodeInfo::default();
        info.apply_adr("2:5001/100 2:5001/100.1");
        assert_eq!(info.addresses, vec!["2:5001/100", "2:5001/100.1"]);
    }
}
