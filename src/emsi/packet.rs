//! EMSI packet codec (spec §4.3, §3 "EMSIData"): builds and parses the
//! brace-delimited `EMSI_DAT` body. Parsing never fails outright — a
//! malformed or truncated packet yields whatever fields were parseable,
//! per spec's "parser never fails on malformed trailing fields" rule.

use crate::address::FidoAddress;
use crate::config::Config;
use std::collections::HashMap;

/// The base link-code (spec §3). Defaults to `Pua` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkBase {
    Pua,
    Pup,
    Npu,
    Hat,
}

impl Default for LinkBase {
    fn default() -> Self {
        LinkBase::Pua
    }
}

impl LinkBase {
    fn as_str(self) -> &'static str {
        match self {
            LinkBase::Pua => "PUA",
            LinkBase::Pup => "PUP",
            LinkBase::Npu => "NPU",
            LinkBase::Hat => "HAT",
        }
    }

    fn parse(s: &str) -> Option<LinkBase> {
        match s {
            "PUA" => Some(LinkBase::Pua),
            "PUP" => Some(LinkBase::Pup),
            "NPU" => Some(LinkBase::Npu),
            "HAT" => Some(LinkBase::Hat),
            _ => None,
        }
    }
}

const LINK_QUALIFIERS: &[&str] = &[
    "PMO", "NFE", "NXP", "NRQ", "HNM", "HXT", "HFE", "HRQ",
];
const SESSION_OPTIONS: &[&str] = &["FNC", "RMA", "RH1"];

fn is_per_aka_flag(tok: &str) -> bool {
    let prefixes = [
        "PU", "PM", "NF", "NX", "NR", "HA", "HN", "HX", "HF", "HR",
    ];
    let Some(prefix) = prefixes.iter().find(|p| tok.starts_with(*p)) else {
        return false;
    };
    let digits = &tok[prefix.len()..];
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// The "link codes" field: pickup/hold policy, session options, and
/// per-AKA flags (spec §3, §4.3).
///
/// Invariant: per-AKA flags and `PUA`/`PUP` are mutually exclusive per
/// emitter (spec §3) — `Build` never emits both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCodes {
    pub base: Option<LinkBase>,
    pub qualifiers: Vec<String>,
    pub session_options: Vec<String>,
    pub per_aka_flags: Vec<String>,
}

impl LinkCodes {
    pub fn effective_base(&self) -> LinkBase {
        self.base.unwrap_or_default()
    }

    fn parse(field: &str) -> LinkCodes {
        let mut codes = LinkCodes::default();
        for tok in field.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(base) = LinkBase::parse(tok) {
                codes.base = Some(base);
            } else if LINK_QUALIFIERS.contains(&tok) {
                codes.qualifiers.push(tok.to_string());
            } else if SESSION_OPTIONS.contains(&tok) {
                codes.session_options.push(tok.to_string());
            } else if is_per_aka_flag(tok) {
                codes.per_aka_flags.push(tok.to_string());
            }
        }
        codes
    }

    fn build(&self, config: &Config) -> String {
        let mut parts = Vec::new();
        if self.per_aka_flags.is_empty() && config.per_aka_flags.is_empty() {
            parts.push(self.effective_base().as_str().to_string());
        }
        parts.extend(self.qualifiers.iter().cloned());
        parts.extend(self.session_options.iter().cloned());
        for flag in config.per_aka_flags.values() {
            parts.push(flag.clone());
        }
        parts.join(",")
    }
}

const COMPAT_PROTOCOLS: &[&str] = &["ZMO", "ZAP", "DZA", "JAN", "HYD"];
const COMPAT_FLAGS: &[&str] = &["DFB", "FRQ", "NRQ", "ARC", "XMA"];
/// Deprecated flags omitted when emitting in EMSI-II mode (spec §3).
const DEPRECATED_IN_EMSI_II: &[&str] = &["ARC", "XMA"];

/// The "compatibility codes" field: transfer protocols and capability
/// flags (spec §3, §4.3). An empty `protocols` list is NCP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatCodes {
    pub emsi_ii: bool,
    pub protocols: Vec<String>,
    pub flags: Vec<String>,
}

impl CompatCodes {
    pub fn is_ncp(&self) -> bool {
        self.protocols.is_empty()
    }

    fn parse(field: &str) -> CompatCodes {
        let mut codes = CompatCodes::default();
        for tok in field.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if tok == "EII" {
                codes.emsi_ii = true;
            } else if COMPAT_PROTOCOLS.contains(&tok) {
                codes.protocols.push(tok.to_string());
            } else if COMPAT_FLAGS.contains(&tok) {
                codes.flags.push(tok.to_string());
            }
        }
        codes
    }

    fn build(&self, emsi_ii_mode: bool) -> String {
        let mut parts = Vec::new();
        if emsi_ii_mode {
            parts.push("EII".to_string());
        }
        parts.extend(self.protocols.iter().cloned());
        for flag in &self.flags {
            if emsi_ii_mode && DEPRECATED_IN_EMSI_II.contains(&flag.as_str()) {
                continue;
            }
            parts.push(flag.clone());
        }
        parts.join(",")
    }
}

/// The IDENT sextuple (spec §3 field 10, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentBrackets {
    pub system: String,
    pub location: String,
    pub sysop: String,
    pub phone: String,
    pub speed: String,
    pub flags: String,
}

impl Default for IdentBrackets {
    fn default() -> Self {
        IdentBrackets {
            system: String::new(),
            location: String::new(),
            sysop: String::new(),
            phone: "-Unpublished-".to_string(),
            speed: "TCP/IP".to_string(),
            flags: "XA".to_string(),
        }
    }
}

/// A fully assembled or parsed EMSI_DAT body (spec §3 "EMSIData").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmsiData {
    pub addresses: Vec<FidoAddress>,
    pub password: String,
    pub link_codes: LinkCodes,
    pub compat_codes: CompatCodes,
    pub mailer_product_code: String,
    pub mailer_name: String,
    pub mailer_version: String,
    pub mailer_serial: String,
    pub ident: Option<IdentBrackets>,
    /// Unbracketed `KEY:value` extras that `IDENT` did not already supply
    /// (spec §9 open question: IDENT takes precedence, `KEY:` fills gaps).
    pub extras: HashMap<String, String>,
}

impl EmsiData {
    /// The index-0 address, i.e. the "primary" one (spec §3 invariant).
    pub fn primary_address(&self) -> Option<&FidoAddress> {
        self.addresses.first()
    }
}

/// Assemble the brace-delimited EMSI_DAT body for `data`, honoring
/// `config.emsi_ii` for the compat-codes leading `EII` tag and the
/// deprecated-flag omission (spec §3, §4.3). Does not add the outer
/// `**EMSI_DAT`/length/CRC framing — see [`crate::emsi::dat::frame`].
pub fn build(data: &EmsiData, config: &Config) -> String {
    let addresses = data
        .addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let ident = data.ident.clone().unwrap_or_default();

    let mut out = String::new();
    out.push_str("{EMSI}");
    out.push('{');
    out.push_str(&addresses);
    out.push('}');
    out.push('{');
    out.push_str(&data.password);
    out.push('}');
    out.push('{');
    out.push_str(&data.link_codes.build(config));
    out.push('}');
    out.push('{');
    out.push_str(&data.compat_codes.build(config.emsi_ii));
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_product_code);
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_name);
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_version);
    out.push('}');
    out.push('{');
    out.push_str(&data.mailer_serial);
    out.push('}');
    out.push_str("{IDENT[");
    out.push_str(&ident.system);
    out.push_str("][");
    out.push_str(&ident.location);
    out.push_str("][");
    out.push_str(&ident.sysop);
    out.push_str("][");
    out.push_str(&ident.phone);
    out.push_str("][");
    out.push_str(&ident.speed);
    out.push_str("][");
    out.push_str(&ident.flags);
    out.push_str("]}");
    for (key, value) in &data.extras {
        out.push('{');
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('}');
    }
    out
}

/// Parse an EMSI_DAT body (with or without the outer `**EMSI_DAT` +
/// 4-hex-length header already stripped). Unknown or missing positions
/// are tolerated; this never returns an error — a partial `EmsiData` is
/// always better than nothing (spec §4.3, §7 `Malformed`).
pub fn parse(packet: &str) -> EmsiData {
    let body = strip_dat_header(packet);
    let fields = split_braces(body);

    let mut data = EmsiData::default();

    // Position 1 is the literal "EMSI" tag; skip it.
    let mut idx = 0;
    for field in fields.iter() {
        if field.starts_with("IDENT") {
            data.ident = Some(parse_ident(field));
            continue;
        }
        if idx == 0 && field == "EMSI" {
            idx += 1;
            continue;
        }
        if field.contains(':') && !field.contains('/') {
            if let Some((k, v)) = field.split_once(':') {
                data.extras.entry(k.to_string()).or_insert_with(|| v.to_string());
            }
            continue;
        }
        match idx {
            1 => {
                data.addresses = field
                    .split_whitespace()
                    .filter_map(FidoAddress::parse)
                    .collect();
            }
            2 => data.password = field.to_string(),
            3 => data.link_codes = LinkCodes::parse(field),
            4 => data.compat_codes = CompatCodes::parse(field),
            5 => data.mailer_product_code = field.to_string(),
            6 => data.mailer_name = field.to_string(),
            7 => data.mailer_version = field.to_string(),
            8 => data.mailer_serial = field.to_string(),
            _ => {}
        }
        idx += 1;
    }
    data
}

fn strip_dat_header(packet: &str) -> &str {
    let s = packet.trim_start();
    let s = s.strip_prefix("**EMSI_DAT").unwrap_or(s);
    // A 4-hex-digit length may still be present if the caller passed the
    // framed packet rather than just the body.
    if s.len() >= 4 && s.as_bytes()[..4].iter().all(|b| (*b as char).is_ascii_hexdigit()) {
        &s[4..]
    } else {
        s
    }
}

/// Split a brace-delimited string into its `{...}` field contents, in
/// order. A bare `\` inside a field escapes the next character so that an
/// escaped `}` doesn't end the field early.
fn split_braces(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if depth > 0 => escaped = true,
            '{' => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            '}' => {
                if depth > 1 {
                    current.push(c);
                }
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    fields.push(std::mem::take(&mut current));
                }
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
    }
    fields
}

fn parse_ident(field: &str) -> IdentBrackets {
    let rest = field.strip_prefix("IDENT").unwrap_or(field);
    let brackets = extract_brackets(rest);
    let mut iter = brackets.into_iter();
    let mut next = || iter.next().unwrap_or_default();
    let system = next();
    let location = next();
    let sysop = next();
    let phone = next();
    let speed = next();
    let flags = next();
    IdentBrackets {
        system,
        location: location,
        sysop,
        phone: if phone.is_empty() { IdentBrackets::default().phone } else { phone },
        speed: if speed.is_empty() { IdentBrackets::default().speed } else { speed },
        flags: if flags.is_empty() { IdentBrackets::default().flags } else { flags },
    }
}

/// Single-scan `[...]` extractor. `\` escapes the next character; a
/// nested `[` inside an already-open bracket is treated as literal
/// content, not a new bracket (spec §4.3).
pub fn extract_brackets(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_bracket = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_bracket => escaped = true,
            '[' if !in_bracket => in_bracket = true,
            '[' if in_bracket => current.push(c),
            ']' if in_bracket => {
                out.push(std::mem::take(&mut current));
                in_bracket = false;
            }
            _ if in_bracket => current.push(c),
            _ => {}
        }
    }
    out
}
