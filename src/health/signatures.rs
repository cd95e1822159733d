//! Text signatures of tunnel error pages.
//!
//! Tunnel providers answer for a dead upstream with their own error page,
//! often with a 2xx or 404 status, so the body has to be inspected.

use aho_corasick::AhoCorasick;

pub const DEFAULT_SIGNATURES: &[&str] = &[
    "ERR_NGROK",
    "ngrok gateway error",
    "Tunnel not found",
    "tunnel session failed",
    "The endpoint is offline",
    "502 Bad Gateway",
    "504 Gateway Time-out",
    "Sandbox not found",
    "Closed Port Error",
    "Connection refused on port",
];

/// Case-insensitive matcher over a configurable signature list.
#[derive(Debug, Clone)]
pub struct FailureSignatures {
    matcher: AhoCorasick,
    patterns: Vec<String>,
}

impl FailureSignatures {
    pub fn new<I, S>(patterns: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.trim().is_empty())
            .collect();
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .map_err(|e| anyhow::anyhow!("Invalid tunnel failure signatures: {e}"))?;
        Ok(Self { matcher, patterns })
    }

    /// First signature found in `body`, if any.
    pub fn find(&self, body: &str) -> Option<&str> {
        self.matcher
            .find(body)
            .map(|m| self.patterns[m.pattern().as_usize()].as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for FailureSignatures {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURES.iter().copied()).expect("default signatures are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        let sigs = FailureSignatures::default();
        assert_eq!(
            sigs.find("<h1>502 bad gateway</h1>"),
            Some("502 Bad Gateway")
        );
        assert_eq!(
            sigs.find("Tunnel abc.ngrok.io not found ERR_NGROK_3200"),
            Some("ERR_NGROK")
        );
        assert!(sigs.find("<div id=\"root\"></div>").is_none());
    }

    #[test]
    fn blank_patterns_are_dropped() {
        let sigs = FailureSignatures::new(["", "  ", "offline"]).unwrap();
        assert_eq!(sigs.len(), 1);
        assert!(sigs.find("anything").is_none());
        assert_eq!(sigs.find("host OFFLINE"), Some("offline"));
    }

    #[test]
    fn empty_list_never_matches() {
        let sigs = FailureSignatures::new(Vec::<String>::new()).unwrap();
        assert!(sigs.is_empty());
        assert!(sigs.find("502 Bad Gateway").is_none());
    }
}
