//! Bot detection
//!
//! Any single signal marks a request as automated. Bots are never refused
//! here; callers use the verdict to skip counting and to serve anonymous
//! cache entries.

use crate::error::GateError;
use bazaar_model::{ClientInfo, ViewSignals};
use dashmap::DashMap;
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Headers a browser always sends
pub const STANDARD_HEADERS: [&str; 4] = ["accept", "accept-language", "accept-encoding", "user-agent"];

/// Which signal fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotSignal {
    /// User-agent matched a bot pattern
    UserAgent,
    /// Source address in a bot range
    IpRange,
    /// Automation header present
    Headless,
    /// Two or more standard headers absent
    MissingHeaders,
    /// Requests in a session arrive too fast
    RequestGap,
    /// Fast service with no human interaction recorded
    InertFastView,
}

impl BotSignal {
    /// Log and metric label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserAgent => "user_agent",
            Self::IpRange => "ip_range",
            Self::Headless => "headless",
            Self::MissingHeaders => "missing_headers",
            Self::RequestGap => "request_gap",
            Self::InertFastView => "inert_fast_view",
        }
    }
}

/// Detection outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotVerdict {
    /// Signals that fired
    pub signals: Vec<BotSignal>,
}

impl BotVerdict {
    /// Whether any signal fired
    #[inline]
    #[must_use]
    pub fn is_bot(&self) -> bool {
        !self.signals.is_empty()
    }
}

/// Timing facts about the current request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestTiming {
    /// Time the client spent on the page before reporting
    pub service_time: Option<Duration>,
    /// Interaction signals reported with a view
    pub signals: Option<ViewSignals>,
}

/// Signal switches and tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BotSignalConfig {
    /// Check user-agent patterns
    pub user_agent: bool,
    /// Check source ranges
    pub ip_ranges: bool,
    /// Check automation headers
    pub headless: bool,
    /// Check standard headers
    pub missing_headers: bool,
    /// Check request timing
    pub timing: bool,
    /// Case-insensitive user-agent regexes
    pub user_agent_patterns: Vec<String>,
    /// Address ranges as `addr/len`
    pub bot_ranges: Vec<String>,
    /// Header names that only automation sets
    pub automation_headers: Vec<String>,
    /// Minimum gap between requests of one session
    pub min_request_gap_ms: u64,
    /// Views served faster than this with no interaction are automated
    pub min_service_ms: u64,
}

impl Default for BotSignalConfig {
    fn default() -> Self {
        let patterns = [
            r"bot\b",
            r"bot/",
            "crawl",
            "spider",
            "slurp",
            "facebookexternalhit",
            "embedly",
            "headlesschrome",
            "phantomjs",
            "selenium",
            "puppeteer",
            "playwright",
            r"^curl/",
            r"^wget/",
            "python-requests",
            "scrapy",
            "go-http-client",
            "java/",
        ];
        Self {
            user_agent: true,
            ip_ranges: true,
            headless: true,
            missing_headers: true,
            timing: true,
            user_agent_patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            bot_ranges: vec![
                "66.249.64.0/19".to_string(),
                "157.55.39.0/24".to_string(),
                "40.77.167.0/24".to_string(),
                "207.46.13.0/24".to_string(),
            ],
            automation_headers: vec![
                "x-headless".to_string(),
                "x-automation".to_string(),
                "x-selenium".to_string(),
                "x-puppeteer".to_string(),
                "x-playwright".to_string(),
            ],
            min_request_gap_ms: 50,
            min_service_ms: 100,
        }
    }
}

/// Address range in prefix notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix_len: u8,
}

impl IpRange {
    /// Whether `ip` lies inside
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix_len);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix_len);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

fn mask_u32(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len.min(32)))
    }
}

fn mask_u128(len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(len.min(128)))
    }
}

impl FromStr for IpRange {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GateError::InvalidIpRange(s.to_string());
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let network: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match len {
            Some(len) => len.trim().parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix_len > max {
            return Err(invalid());
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Compiled bot detector
#[derive(Debug)]
pub struct BotDetector {
    config: BotSignalConfig,
    user_agents: RegexSet,
    ranges: Vec<IpRange>,
    last_seen: DashMap<String, Instant>,
}

impl BotDetector {
    /// Compile `config`
    ///
    /// # Errors
    /// Bad regex or range.
    pub fn new(config: BotSignalConfig) -> Result<Self, GateError> {
        let user_agents = RegexSetBuilder::new(&config.user_agent_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| GateError::InvalidPattern(e.to_string()))?;
        let ranges = config
            .bot_ranges
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<IpRange>, _>>()?;
        Ok(Self {
            config,
            user_agents,
            ranges,
            last_seen: DashMap::new(),
        })
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BotSignalConfig {
        &self.config
    }

    /// Evaluate every enabled signal
    ///
    /// Records the request time against the client's session, so call once
    /// per request.
    pub fn detect(&self, client: &ClientInfo, timing: &RequestTiming) -> BotVerdict {
        let mut signals = Vec::new();
        let cfg = &self.config;

        if cfg.user_agent
            && client
                .user_agent()
                .is_some_and(|ua| self.user_agents.is_match(ua))
        {
            signals.push(BotSignal::UserAgent);
        }
        if cfg.ip_ranges
            && client
                .ip
                .is_some_and(|ip| self.ranges.iter().any(|r| r.contains(ip)))
        {
            signals.push(BotSignal::IpRange);
        }
        if cfg.headless
            && cfg
                .automation_headers
                .iter()
                .any(|h| client.header(h).is_some())
        {
            signals.push(BotSignal::Headless);
        }
        if cfg.missing_headers {
            let missing = STANDARD_HEADERS
                .iter()
                .filter(|h| client.header(h).map_or(true, str::is_empty))
                .count();
            if missing >= 2 {
                signals.push(BotSignal::MissingHeaders);
            }
        }
        if cfg.timing {
            if let Some(gap) = self.observe(client.session_id.as_deref()) {
                if gap < Duration::from_millis(cfg.min_request_gap_ms) {
                    signals.push(BotSignal::RequestGap);
                }
            }
            if let Some(service) = timing.service_time {
                let inert = timing.signals.map_or(true, |s| s.is_inert());
                if service < Duration::from_millis(cfg.min_service_ms) && inert {
                    signals.push(BotSignal::InertFastView);
                }
            }
        }

        if !signals.is_empty() {
            for signal in &signals {
                metrics::counter!("bazaar_gate_bot_signals_total", "signal" => signal.as_str())
                    .increment(1);
            }
            tracing::debug!(
                signals = ?signals,
                user_agent = client.user_agent().unwrap_or("-"),
                "request flagged as automated"
            );
        }
        BotVerdict { signals }
    }

    /// Gap since the session's previous request
    fn observe(&self, session: Option<&str>) -> Option<Duration> {
        let session = session?;
        let now = Instant::now();
        self.last_seen
            .insert(session.to_string(), now)
            .map(|previous| now.saturating_duration_since(previous))
    }

    /// Forget sessions idle for longer than `idle`
    pub fn prune_sessions(&self, idle: Duration) {
        let now = Instant::now();
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < idle);
    }

    /// Sessions with a remembered request time
    #[must_use]
    pub fn tracked_sessions(&self) -> usize {
        self.last_seen.len()
    }
}
