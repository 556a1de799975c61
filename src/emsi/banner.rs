//! Banner software extractor (spec §4.4): regex-based mailer
//! identification from the free-text banner accumulated before any EMSI
//! token is seen.

use regex::Regex;
use std::sync::OnceLock;

/// What a banner told us about the remote mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareInfo {
    pub name: String,
    pub version: String,
    pub platform: Option<String>,
    /// Always `"banner"` — mirrors `software_source` on the result record
    /// (spec §6) so callers don't need a separate tag for "where did this
    /// come from".
    pub source: &'static str,
}

fn token_stripper() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\*{0,2}EMSI_(INQ|REQ|ACK|NAK|CLI|HBT|DAT)[0-9A-F]{0,4}").unwrap())
}

fn patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // BinkleyForce: "BinkleyForce/2.50" or "Binkley-Force v2.60"
            Regex::new(r"(?i)binkley-?force[/\s]v?([0-9][0-9.]*)").unwrap(),
            // qico and its forks: "Running qico v0.57.1xe"
            Regex::new(r"(?i)\bqico\b\s+v?([0-9][0-9.]*\w*)").unwrap(),
            // ifcico: "ifcico 1.0" / "ifcico/1.0"
            Regex::new(r"(?i)\bifcico\b[/\s]v?([0-9][0-9.]*\w*)").unwrap(),
            // Generic "Name Version/Platform (c) ..."
            Regex::new(r"(?i)^([A-Za-z][A-Za-z0-9_\-]*)\s+v?([0-9][0-9.]*\w*)/([A-Za-z0-9_\-]+)")
                .unwrap(),
            // Fallback: "Name N.N[.N]"
            Regex::new(r"(?i)([A-Za-z][A-Za-z0-9_\-]*)\s+v?(\d+\.\d+(?:\.\d+)?)").unwrap(),
        ]
    })
}

/// Strip known EMSI token literals from `banner`, trim, then try each
/// pattern in order. Returns `None` if nothing matched.
pub fn extract_software(banner: &str) -> Option<SoftwareInfo> {
    let stripped = token_stripper().replace_all(banner, "");
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return None;
    }

    for (idx, pattern) in patterns().iter().enumerate() {
        if let Some(caps) = pattern.captures(trimmed) {
            // The first three patterns (binkleyforce, qico, ifcico) are
            // each anchored to one known product name and only capture a
            // version.
            const KNOWN_NAMES: [&str; 3] = ["BinkleyForce", "qico", "ifcico"];
            let (name, version, platform) = if idx < KNOWN_NAMES.len() {
                (
                    KNOWN_NAMES[idx].to_string(),
                    caps.get(1).unwrap().as_str().to_string(),
                    None,
                )
            } else {
                (
                    caps.get(1).unwrap().as_str().to_string(),
                    caps.get(2).unwrap().as_str().to_string(),
                    caps.get(3).map(|m| m.as_str().to_string()),
                )
            };
            return Some(SoftwareInfo {
                name,
                version,
                platform,
                source: "banner",
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S3: banner contains "Running qico v0.57.1xe" ahead of the EMSI_REQ
    /// token.
    #[test]
    fn s3_extracts_qico_version() {
        let banner = "Welcome to FidoNet BBS!\r\nRunning qico v0.57.1xe\r\n";
        let info = extract_software(banner).unwrap();
        assert_eq!(info.name.to_lowercase(), "qico");
        assert_eq!(info.version, "0.57.1xe");
        assert_eq!(info.source, "banner");
    }

    #[test]
    fn strips_embedded_emsi_tokens_before_matching() {
        let banner = "BinkleyForce/2.60\r\n**EMSI_INQC816\r\n";
        let info = extract_software(banner).unwrap();
        assert_eq!(info.version, "2.60");
    }

    #[test]
    fn generic_name_version_platform_pattern() {
        let info = extract_software("BinkD 1.1a/Linux (c) 2005").unwrap();
        assert_eq!(info.name, "BinkD");
        assert_eq!(info.version, "1.1a");
        assert_eq!(info.platform.as_deref(), Some("Linux"));
    }

    #[test]
    fn fallback_name_and_version_only() {
        let info = extract_software("SomeMailer 3.2").unwrap();
        assert_eq!(info.name, "SomeMailer");
        assert_eq!(info.version, "3.2");
        assert!(info.platform.is_none());
    }

    #[test]
    fn no_match_returns_none() {
        assert!(extract_software("").is_none());
        assert!(extract_software("   \r\n  ").is_none());
        assert!(extract_software("hello there").is_none());
    }
}
