//! FidoNet address parsing and the `normalize` helper used by both
//! handshake engines (spec §4.8 "address validation", §4.10 "address
//! normalization", §8 property 6).

/// A parsed `Zone:Net/Node[.Point][@Domain]` address.
///
/// Only the zone/net/node/point numbers and the domain suffix are
/// meaningful to this crate; the formatted string is what gets sent on
/// the wire and what callers compare against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidoAddress {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    pub point: u16,
    pub domain: Option<String>,
}

impl FidoAddress {
    /// Parse a single `Z:N/F[.P][@domain]` token. Returns `None` if the
    /// token doesn't contain both `:` and `/`, per the EMSI address-field
    /// extraction rule in spec §4.3.
    pub fn parse(s: &str) -> Option<FidoAddress> {
        if !s.contains(':') || !s.contains('/') {
            return None;
        }
        let (rest, domain) = match s.split_once('@') {
            Some((rest, domain)) => (rest, Some(domain.to_string())),
            None => (s, None),
        };
        let (zone_s, rest) = rest.split_once(':')?;
        let (net_s, node_s) = rest.split_once('/')?;
        let (node_s, point_s) = match node_s.split_once('.') {
            Some((n, p)) => (n, Some(p)),
            None => (node_s, None),
        };
        let zone = zone_s.parse().ok()?;
        let net = net_s.parse().ok()?;
        let node = node_s.parse().ok()?;
        let point = match point_s {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        Some(FidoAddress {
            zone,
            net,
            node,
            point,
            domain,
        })
    }

    /// `true` if this address actually carries a point number.
    pub fn has_point(&self) -> bool {
        self.point != 0
    }
}

impl std::fmt::Display for FidoAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.zone, self.net, self.node)?;
        if self.has_point() {
            write!(f, ".{}", self.point)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "@{}", domain)?;
        }
        Ok(())
    }
}

/// Lowercase, trim, and drop any `@domain` suffix, so that
/// `"2:5020/2021.0 "`, `"2:5020/2021"`, and `"2:5020/2021@fidonet"` all
/// normalize to the same key. Used both for handshake address validation
/// (spec §4.8) and config-override lookup (spec §4.10).
pub fn normalize(addr: &str) -> String {
    let trimmed = addr.trim();
    let without_domain = trimmed.split('@').next().unwrap_or("").trim();
    let without_trailing_point = without_domain
        .strip_suffix(".0")
        .unwrap_or(without_domain);
    without_trailing_point.to_ascii_lowercase()
}
