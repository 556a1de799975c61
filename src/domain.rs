//! Registrable-domain extraction (spec §4.11): reduce a probe target's
//! host string to its eTLD+1 using the public suffix list, for
//! aggregating results by owning organization rather than raw hostname.

use psl::{Domain, List, Psl, Type};
use std::collections::HashMap;
use std::net::IpAddr;

/// Strip an optional trailing `:port`, being careful not to mangle a
/// bracketed IPv6 literal (`[::1]:24554`).
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &host[..end + 2];
        }
        return host;
    }
    match host.rsplit_once(':') {
        Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !h.is_empty() => h,
        _ => host,
    }
}

/// Extract the registrable domain (eTLD+1) for a probe target host.
/// Returns an empty string for bare IP addresses, hosts the public suffix
/// list doesn't recognize, or hosts sitting on a *private* PSL suffix
/// (e.g. a dynamic-DNS provider's own entry) rather than an
/// ICANN-managed one (spec §4.11: "when the suffix is ICANN-managed;
/// empty string otherwise").
pub fn registrable_domain(host: &str) -> String {
    let trimmed = strip_port(host.trim());
    let trimmed = trimmed.trim_end_matches('.');
    let bare = trimmed.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return String::new();
    }
    let lower = trimmed.to_ascii_lowercase();
    let is_icann = List
        .suffix(lower.as_bytes())
        .and_then(|s| s.typ())
        .map(|t| t == Type::Icann)
        .unwrap_or(false);
    if !is_icann {
        return String::new();
    }
    match List.domain(lower.as_bytes()) {
        Some(domain) => domain_to_string(domain),
        None => String::new(),
    }
}

fn domain_to_string(domain: Domain<'_>) -> String {
    String::from_utf8_lossy(domain.as_bytes()).to_string()
}

/// Count probe targets per registrable domain, for summarizing a batch of
/// results by owning organization (spec §6 "aggregation").
pub fn group_by_domain<'a>(hosts: impl IntoIterator<Item = &'a str>) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for host in hosts {
        let key = registrable_domain(host);
        if !key.is_empty() {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_etld_plus_one() {
        assert_eq!(registrable_domain("bbs.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.c.example.co.uk"), "example.co.uk");
    }

    #[test]
    fn strips_port_before_extraction() {
        assert_eq!(registrable_domain("bbs.example.com:24554"), "example.com");
    }

    #[test]
    fn ipv6_literal_with_port_is_not_mangled() {
        assert_eq!(registrable_domain("[2001:db8::1]:24554"), "");
    }

    #[test]
    fn bare_ip_has_no_registrable_domain() {
        assert_eq!(registrable_domain("192.0.2.10"), "");
        assert_eq!(registrable_domain("::1"), "");
    }

    #[test]
    fn trailing_dot_and_case_are_normalized() {
        assert_eq!(registrable_domain("BBS.Example.COM."), "example.com");
    }

    /// `herokuapp.com` is a *private* PSL entry, not ICANN-managed; spec
    /// §4.11 calls for an empty result rather than `herokuapp.com`.
    #[test]
    fn private_suffix_yields_empty_domain() {
        assert_eq!(registrable_domain("my-bbs.herokuapp.com"), "");
    }

    #[test]
    fn group_by_domain_counts_hosts() {
        let hosts = ["a.example.com", "b.example.com", "x.example.org"];
        let counts = group_by_domain(hosts);
        assert_eq!(counts.get("example.com"), Some(&2));
        assert_eq!(counts.get("example.org"), Some(&1));
    }
}
