//! User-Agent based bot detection.
//!
//! Known well-behaved crawler families are classified first so a search engine that
//! calls itself "Googlebot" is not caught by the generic `bot` pattern. The generic
//! pattern only matches `bot` at the end of a product token, so device names such as
//! `CUBOT_X19` in a phone browser's agent are not mistaken for crawlers.

use super::{AdmissionError, DenyReason, Mode, RequestFacts, Stage, StageOutcome};
use std::str::FromStr;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BotCategory {
    SearchEngine,
    Monitor,
    Preview,
    Tool,
    Headless,
    Generic,
}

impl BotCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SearchEngine => "search_engine",
            Self::Monitor => "monitor",
            Self::Preview => "preview",
            Self::Tool => "tool",
            Self::Headless => "headless",
            Self::Generic => "generic",
        }
    }
}

impl FromStr for BotCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "search_engine" => Ok(Self::SearchEngine),
            "monitor" => Ok(Self::Monitor),
            "preview" => Ok(Self::Preview),
            "tool" => Ok(Self::Tool),
            "headless" => Ok(Self::Headless),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown bot category: {other}")),
        }
    }
}

// Order matters: named families before the generic catch-all.
const SIGNATURES: &[(BotCategory, &[&str])] = &[
    (
        BotCategory::SearchEngine,
        &[
            "googlebot",
            "bingbot",
            "duckduckbot",
            "yandexbot",
            "baiduspider",
            "applebot",
            "slurp",
        ],
    ),
    (
        BotCategory::Monitor,
        &["uptimerobot", "pingdom", "statuscake", "datadogsynthetics"],
    ),
    (
        BotCategory::Preview,
        &[
            "slackbot",
            "discordbot",
            "twitterbot",
            "facebookexternalhit",
            "linkedinbot",
            "telegrambot",
            "whatsapp",
        ],
    ),
    (
        BotCategory::Tool,
        &[
            "curl/",
            "wget/",
            "httpie/",
            "python-requests",
            "python-urllib",
            "go-http-client",
            "java/",
            "okhttp",
            "libwww-perl",
            "scrapy",
            "node-fetch",
        ],
    ),
    (
        BotCategory::Headless,
        &[
            "headlesschrome",
            "phantomjs",
            "puppeteer",
            "playwright",
            "selenium",
        ],
    ),
    (
        BotCategory::Generic,
        &["crawler", "spider", "scraper"],
    ),
];

/// Classify a User-Agent. A missing or blank agent counts as a generic bot.
#[must_use]
pub fn classify(user_agent: Option<&str>) -> Option<BotCategory> {
    let agent = match user_agent.map(str::trim) {
        Some(agent) if !agent.is_empty() => agent.to_ascii_lowercase(),
        _ => return Some(BotCategory::Generic),
    };
    SIGNATURES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| agent.contains(needle)))
        .map(|(category, _)| *category)
        .or_else(|| ends_bot_token(&agent).then_some(BotCategory::Generic))
}

/// `bot` followed by a token separator or the end of the agent.
fn ends_bot_token(agent: &str) -> bool {
    agent.match_indices("bot").any(|(at, needle)| {
        agent[at + needle.len()..]
            .chars()
            .next()
            .map_or(true, |next| matches!(next, '/' | ';' | ')' | '-') || next.is_whitespace())
    })
}

#[derive(Clone, Debug)]
pub struct BotStage {
    allow: Vec<BotCategory>,
    mode: Mode,
}

impl BotStage {
    #[must_use]
    pub fn new(allow: Vec<BotCategory>, mode: Mode) -> Self {
        Self { allow, mode }
    }
}

impl Stage for BotStage {
    fn name(&self) -> &'static str {
        "bot"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn evaluate(&self, facts: &RequestFacts) -> Result<StageOutcome, AdmissionError> {
        match classify(facts.user_agent.as_deref()) {
            Some(category) if !self.allow.contains(&category) => {
                warn!(
                    reason = "bot",
                    category = category.as_str(),
                    ip = %facts.client_ip,
                    user_agent = facts.user_agent.as_deref().unwrap_or(""),
                    path = %facts.path,
                    "Bot request blocked"
                );
                Ok(StageOutcome::Deny(DenyReason::Bot))
            }
            _ => Ok(StageOutcome::Continue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Tier;
    use chrono::Utc;

    fn request(user_agent: Option<&str>) -> RequestFacts {
        RequestFacts {
            arrived_at: Utc::now(),
            client_ip: "198.51.100.1".to_string(),
            user_agent: user_agent.map(str::to_string),
            method: "GET".to_string(),
            path: "/".to_string(),
            query: None,
            tier: Tier::Guest,
        }
    }

    #[test]
    fn classifies_known_agents() {
        assert_eq!(
            classify(Some("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)")),
            Some(BotCategory::SearchEngine)
        );
        assert_eq!(classify(Some("curl/8.5.0")), Some(BotCategory::Tool));
        assert_eq!(
            classify(Some("python-requests/2.31.0")),
            Some(BotCategory::Tool)
        );
        assert_eq!(
            classify(Some("Mozilla/5.0 HeadlessChrome/120.0")),
            Some(BotCategory::Headless)
        );
        assert_eq!(
            classify(Some("Slackbot-LinkExpanding 1.0")),
            Some(BotCategory::Preview)
        );
        assert_eq!(classify(Some("SomeCrawler/1.0")), Some(BotCategory::Generic));
        assert_eq!(
            classify(Some("Mozilla/5.0 (Macintosh) Safari/605.1.15")),
            None
        );
    }

    #[test]
    fn generic_bot_needs_a_token_boundary() {
        assert_eq!(
            classify(Some(
                "Mozilla/5.0 (Linux; Android 9; CUBOT_X19) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36"
            )),
            None
        );
        assert_eq!(classify(Some("SomeBot/1.0")), Some(BotCategory::Generic));
        assert_eq!(classify(Some("mybot")), Some(BotCategory::Generic));
        assert_eq!(
            classify(Some("Mozilla/5.0 (compatible; AhrefsBot; +http://ahrefs.com/robot/)")),
            Some(BotCategory::Generic)
        );
    }

    #[test]
    fn missing_agent_is_a_bot() {
        assert_eq!(classify(None), Some(BotCategory::Generic));
        assert_eq!(classify(Some("   ")), Some(BotCategory::Generic));
    }

    #[test]
    fn allow_list_lets_search_engines_through() -> Result<(), AdmissionError> {
        let stage = BotStage::new(vec![BotCategory::SearchEngine], Mode::Live);
        assert_eq!(
            stage.evaluate(&request(Some("Mozilla/5.0 (compatible; bingbot/2.0)")))?,
            StageOutcome::Continue
        );
        assert_eq!(
            stage.evaluate(&request(Some("Wget/1.21")))?,
            StageOutcome::Deny(DenyReason::Bot)
        );
        assert_eq!(
            stage.evaluate(&request(None))?,
            StageOutcome::Deny(DenyReason::Bot)
        );
        Ok(())
    }

    #[test]
    fn empty_allow_list_denies_search_engines() -> Result<(), AdmissionError> {
        let stage = BotStage::new(Vec::new(), Mode::Live);
        assert_eq!(
            stage.evaluate(&request(Some("Googlebot/2.1")))?,
            StageOutcome::Deny(DenyReason::Bot)
        );
        Ok(())
    }

    #[test]
    fn parses_categories() {
        assert_eq!("search-engine".parse::<BotCategory>(), Ok(BotCategory::SearchEngine));
        assert_eq!("MONITOR".parse::<BotCategory>(), Ok(BotCategory::Monitor));
        assert!("robots".parse::<BotCategory>().is_err());
    }
}
