//! Sliding-window rate limits
//!
//! Each endpoint class has a `(window, max, key_by)` rule. The limiter keeps
//! the admission times of every `(class, key)` pair inside the window and
//! refuses the request that would make it `max + 1`.

use crate::error::GateError;
use bazaar_model::{BazaarError, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Throttled endpoint groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointClass {
    /// Anything not listed
    Generic,
    /// One-time password issue and check
    Otp,
    /// Email verification
    EmailVerify,
    /// Verification email resend
    EmailResend,
    /// Profile edits
    ProfileUpdate,
    /// Session token refresh
    TokenRefresh,
    /// Password reset
    PasswordReset,
    /// Login attempts
    Login,
    /// Email sign-up
    EmailRegistration,
    /// Phone sign-up
    PhoneRegistration,
    /// Phone verification
    PhoneVerify,
    /// View and impression recording
    View,
    /// Feed reads
    Recommendation,
    /// Search reads
    Search,
}

impl EndpointClass {
    /// All classes
    pub const ALL: [EndpointClass; 14] = [
        Self::Generic,
        Self::Otp,
        Self::EmailVerify,
        Self::EmailResend,
        Self::ProfileUpdate,
        Self::TokenRefresh,
        Self::PasswordReset,
        Self::Login,
        Self::EmailRegistration,
        Self::PhoneRegistration,
        Self::PhoneVerify,
        Self::View,
        Self::Recommendation,
        Self::Search,
    ];

    /// Configuration name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Otp => "otp",
            Self::EmailVerify => "emailVerify",
            Self::EmailResend => "emailResend",
            Self::ProfileUpdate => "profileUpdate",
            Self::TokenRefresh => "tokenRefresh",
            Self::PasswordReset => "passwordReset",
            Self::Login => "login",
            Self::EmailRegistration => "emailRegistration",
            Self::PhoneRegistration => "phoneRegistration",
            Self::PhoneVerify => "phoneVerify",
            Self::View => "view",
            Self::Recommendation => "recommendation",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointClass {
    type Err = BazaarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| BazaarError::validation(format!("unknown endpoint class {s:?}")))
    }
}

/// Which identifier a window is counted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyBy {
    /// Source address only
    Ip,
    /// User id, else source address
    UserOrIp,
    /// Email or phone from the body, else source address
    IdentifierOrIp,
}

/// One class's limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// Window length in seconds
    pub window_secs: u64,
    /// Requests admitted per window
    pub max: u32,
    /// Key derivation
    pub key_by: KeyBy,
}

impl RateLimitRule {
    /// Create rule
    #[inline]
    #[must_use]
    pub const fn new(window_secs: u64, max: u32, key_by: KeyBy) -> Self {
        Self {
            window_secs,
            max,
            key_by,
        }
    }

    /// Window length
    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rule per class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitTable(pub BTreeMap<EndpointClass, RateLimitRule>);

impl Default for RateLimitTable {
    fn default() -> Self {
        use EndpointClass as C;
        use KeyBy::{IdentifierOrIp, UserOrIp};
        const MIN: u64 = 60;
        const HOUR: u64 = 60 * MIN;
        let rules = [
            (C::Generic, RateLimitRule::new(15 * MIN, 300, UserOrIp)),
            (C::Otp, RateLimitRule::new(15 * MIN, 5, IdentifierOrIp)),
            (C::EmailVerify, RateLimitRule::new(HOUR, 10, IdentifierOrIp)),
            (C::EmailResend, RateLimitRule::new(HOUR, 3, IdentifierOrIp)),
            (C::ProfileUpdate, RateLimitRule::new(HOUR, 20, UserOrIp)),
            (C::TokenRefresh, RateLimitRule::new(15 * MIN, 30, UserOrIp)),
            (C::PasswordReset, RateLimitRule::new(HOUR, 3, IdentifierOrIp)),
            (C::Login, RateLimitRule::new(15 * MIN, 10, IdentifierOrIp)),
            (C::EmailRegistration, RateLimitRule::new(HOUR, 5, IdentifierOrIp)),
            (C::PhoneRegistration, RateLimitRule::new(HOUR, 5, IdentifierOrIp)),
            (C::PhoneVerify, RateLimitRule::new(15 * MIN, 5, IdentifierOrIp)),
            (C::View, RateLimitRule::new(MIN, 120, UserOrIp)),
            (C::Recommendation, RateLimitRule::new(MIN, 60, UserOrIp)),
            (C::Search, RateLimitRule::new(MIN, 30, UserOrIp)),
        ];
        Self(rules.into_iter().collect())
    }
}

impl RateLimitTable {
    /// Rule for `class`, falling back to `generic`
    #[must_use]
    pub fn rule(&self, class: EndpointClass) -> Option<RateLimitRule> {
        self.0
            .get(&class)
            .or_else(|| self.0.get(&EndpointClass::Generic))
            .copied()
    }

    /// Override one class
    #[must_use]
    pub fn with(mut self, class: EndpointClass, rule: RateLimitRule) -> Self {
        self.0.insert(class, rule);
        self
    }

    /// Reject zero windows and caps
    ///
    /// # Errors
    /// First offending class.
    pub fn validate(&self) -> Result<(), GateError> {
        match self
            .0
            .iter()
            .find(|(_, rule)| rule.window_secs == 0 || rule.max == 0)
        {
            Some((class, _)) => Err(GateError::InvalidRule {
                class: class.as_str(),
            }),
            None => Ok(()),
        }
    }
}

/// Who is asking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateSubject {
    /// Authenticated user
    pub user: Option<UserId>,
    /// Source address
    pub ip: Option<IpAddr>,
    /// Email or phone from the request body
    pub identifier: Option<String>,
}

impl RateSubject {
    /// Window key under `key_by`
    #[must_use]
    pub fn key(&self, key_by: KeyBy) -> String {
        let ip = || {
            self.ip
                .map_or_else(|| "ip:unknown".to_string(), |ip| format!("ip:{ip}"))
        };
        match key_by {
            KeyBy::Ip => ip(),
            KeyBy::UserOrIp => self
                .user
                .as_ref()
                .map_or_else(ip, |u| format!("user:{u}")),
            KeyBy::IdentifierOrIp => self
                .identifier
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map_or_else(ip, |id| format!("id:{}", id.to_lowercase())),
        }
    }
}

/// Admitted request's window state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Class cap
    pub limit: u32,
    /// Requests left in the window after this one
    pub remaining: u32,
    /// Seconds until the oldest admission leaves the window
    pub reset_after_secs: u64,
}

impl RateDecision {
    /// Standard rate-limit response headers
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_after_secs.to_string()),
        ]
    }
}

/// Headers for a refused request
#[must_use]
pub fn rejection_headers(limit: u32, retry_after_secs: u64) -> Vec<(&'static str, String)> {
    vec![
        ("Retry-After", retry_after_secs.to_string()),
        ("X-RateLimit-Limit", limit.to_string()),
        ("X-RateLimit-Remaining", "0".to_string()),
        ("X-RateLimit-Reset", retry_after_secs.to_string()),
    ]
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Per-class sliding windows
#[derive(Debug)]
pub struct RateLimiter {
    table: RateLimitTable,
    windows: DashMap<(EndpointClass, String), VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create limiter
    ///
    /// # Errors
    /// Invalid table.
    pub fn new(table: RateLimitTable) -> Result<Self, GateError> {
        table.validate()?;
        Ok(Self {
            table,
            windows: DashMap::new(),
        })
    }

    /// Active table
    #[inline]
    #[must_use]
    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    /// Admit or refuse one request
    ///
    /// # Errors
    /// [`BazaarError::RateLimited`] with a retry hint of at least one second.
    pub fn check(
        &self,
        class: EndpointClass,
        subject: &RateSubject,
    ) -> Result<RateDecision, BazaarError> {
        let Some(rule) = self.table.rule(class) else {
            return Ok(RateDecision {
                limit: u32::MAX,
                remaining: u32::MAX,
                reset_after_secs: 0,
            });
        };
        let key = subject.key(rule.key_by);
        let now = Instant::now();
        let window = rule.window();

        let mut hits = self.windows.entry((class, key.clone())).or_default();
        while hits
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            hits.pop_front();
        }

        let reset_after = |oldest: Option<&Instant>| {
            oldest.map_or(window, |t| (*t + window).saturating_duration_since(now))
        };

        if hits.len() >= rule.max as usize {
            let retry_after_secs = ceil_secs(reset_after(hits.front())).max(1);
            drop(hits);
            metrics::counter!("bazaar_gate_rate_limited_total", "class" => class.as_str())
                .increment(1);
            tracing::info!(class = class.as_str(), key, retry_after_secs, "rate limited");
            return Err(BazaarError::RateLimited { retry_after_secs });
        }

        hits.push_back(now);
        Ok(RateDecision {
            limit: rule.max,
            remaining: rule.max - hits.len() as u32,
            reset_after_secs: ceil_secs(reset_after(hits.front())),
        })
    }

    /// Drop windows with no admissions left in them
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows.retain(|(class, _), hits| {
            let window = self.table.rule(*class).map_or(Duration::ZERO, |r| r.window());
            hits.back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window)
        });
    }

    /// Tracked windows
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitTable::default()).unwrap()
    }

    fn from_ip(ip: &str) -> RateSubject {
        RateSubject {
            ip: Some(ip.parse().unwrap()),
            ..RateSubject::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn login_allows_ten_per_quarter_hour() {
        let limiter = limiter();
        let subject = from_ip("203.0.113.9");
        for n in 1..=10u32 {
            let decision = limiter.check(EndpointClass::Login, &subject).unwrap();
            assert_eq!(decision.remaining, 10 - n);
        }
        let err = limiter.check(EndpointClass::Login, &subject).unwrap_err();
        assert_eq!(err.http_status(), 429);
        assert_eq!(err.retry_after(), Some(900));

        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        assert!(limiter.check(EndpointClass::Login, &subject).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_hint_shrinks_as_window_slides() {
        let limiter = RateLimiter::new(
            RateLimitTable::default()
                .with(EndpointClass::Search, RateLimitRule::new(10, 2, KeyBy::Ip)),
        )
        .unwrap();
        let subject = from_ip("10.0.0.1");
        limiter.check(EndpointClass::Search, &subject).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        limiter.check(EndpointClass::Search, &subject).unwrap();
        let err = limiter.check(EndpointClass::Search, &subject).unwrap_err();
        assert_eq!(err.retry_after(), Some(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        let decision = limiter.check(EndpointClass::Search, &subject).unwrap();
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = limiter();
        let a = from_ip("10.0.0.1");
        let b = from_ip("10.0.0.2");
        for _ in 0..10 {
            limiter.check(EndpointClass::Login, &a).unwrap();
        }
        assert!(limiter.check(EndpointClass::Login, &a).is_err());
        assert!(limiter.check(EndpointClass::Login, &b).is_ok());
        assert!(limiter.check(EndpointClass::Search, &a).is_ok());
    }

    #[test]
    fn key_derivation() {
        let subject = RateSubject {
            user: Some(UserId::from("u1")),
            ip: Some("10.0.0.1".parse().unwrap()),
            identifier: Some(" Ada@Example.com ".to_string()),
        };
        assert_eq!(subject.key(KeyBy::Ip), "ip:10.0.0.1");
        assert_eq!(subject.key(KeyBy::UserOrIp), "user:u1");
        assert_eq!(subject.key(KeyBy::IdentifierOrIp), "id:ada@example.com");
        assert_eq!(RateSubject::default().key(KeyBy::UserOrIp), "ip:unknown");
    }

    #[test]
    fn table_covers_every_class_and_parses() {
        let table = RateLimitTable::default();
        for class in EndpointClass::ALL {
            assert!(table.0.contains_key(&class), "{class}");
            assert_eq!(class.as_str().parse::<EndpointClass>().unwrap(), class);
        }
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["login"]["windowSecs"], 900);
        assert_eq!(json["login"]["keyBy"], "identifierOrIp");
    }

    #[test]
    fn zero_rules_are_rejected() {
        let table = RateLimitTable::default()
            .with(EndpointClass::Otp, RateLimitRule::new(0, 5, KeyBy::Ip));
        assert_eq!(
            RateLimiter::new(table).unwrap_err(),
            GateError::InvalidRule { class: "otp" }
        );
    }

    #[test]
    fn headers() {
        let decision = RateDecision {
            limit: 10,
            remaining: 3,
            reset_after_secs: 60,
        };
        assert!(decision
            .headers()
            .contains(&("X-RateLimit-Remaining", "3".to_string())));
        assert_eq!(rejection_headers(10, 7)[0], ("Retry-After", "7".to_string()));
    }

    proptest! {
        #[test]
        fn never_admits_more_than_max(max in 1u32..20, attempts in 1usize..60) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let limiter = RateLimiter::new(
                    RateLimitTable::default()
                        .with(EndpointClass::View, RateLimitRule::new(60, max, KeyBy::Ip)),
                )
                .unwrap();
                let subject = from_ip("10.0.0.1");
                let admitted = (0..attempts)
                    .filter(|_| limiter.check(EndpointClass::View, &subject).is_ok())
                    .count();
                assert_eq!(admitted, attempts.min(max as usize));
            });
        }
    }
}
