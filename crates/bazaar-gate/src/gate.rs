//! Abuse gate
//!
//! One pass per request: rate limit first, then bot signals. Policy checks
//! run separately once the target product is known.

use crate::bot::{BotDetector, BotSignalConfig, BotVerdict, RequestTiming};
use crate::error::GateError;
use crate::policy::{Action, Actor, PolicySet};
use crate::ratelimit::{EndpointClass, RateDecision, RateLimitTable, RateLimiter, RateSubject};
use bazaar_model::{BazaarError, ClientInfo, Product, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Gate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GateConfig {
    /// Bot signal switches and tables
    pub bots: BotSignalConfig,
    /// Rate limit per endpoint class
    pub rate_limits: RateLimitTable,
    /// Seconds between sweeps of expired windows and idle sessions
    pub sweep_interval_secs: u64,
    /// Sessions idle this long are forgotten
    pub session_idle_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bots: BotSignalConfig::default(),
            rate_limits: RateLimitTable::default(),
            sweep_interval_secs: 60,
            session_idle_secs: 30 * 60,
        }
    }
}

/// What the gate sees about one request
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    /// Authenticated user
    pub user: Option<&'a UserId>,
    /// Transport facts
    pub client: &'a ClientInfo,
    /// Email or phone from an auth-like body
    pub identifier: Option<&'a str>,
    /// Timing facts
    pub timing: RequestTiming,
}

impl<'a> GateRequest<'a> {
    /// Request from `client`
    #[inline]
    #[must_use]
    pub fn new(client: &'a ClientInfo) -> Self {
        Self {
            user: None,
            client,
            identifier: None,
            timing: RequestTiming::default(),
        }
    }

    /// With authenticated user
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user: Option<&'a UserId>) -> Self {
        self.user = user;
        self
    }

    /// With body identifier
    #[inline]
    #[must_use]
    pub fn with_identifier(mut self, identifier: &'a str) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// With timing facts
    #[inline]
    #[must_use]
    pub fn with_timing(mut self, timing: RequestTiming) -> Self {
        self.timing = timing;
        self
    }

    fn subject(&self) -> RateSubject {
        RateSubject {
            user: self.user.cloned(),
            ip: self.client.ip,
            identifier: self.identifier.map(str::to_string),
        }
    }
}

/// Admitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Bot verdict; bots are admitted but not counted
    pub bot: BotVerdict,
    /// Window state for response headers
    pub rate: RateDecision,
}

impl Admission {
    /// Whether the caller is automated
    #[inline]
    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.bot.is_bot()
    }
}

/// Bot, policy and throttle decisions
#[derive(Debug)]
pub struct AbuseGate {
    bots: BotDetector,
    policies: PolicySet,
    limiter: RateLimiter,
    sweep_every: Duration,
    session_idle: Duration,
    last_sweep: Mutex<Instant>,
}

impl AbuseGate {
    /// Build from configuration with the default policy set
    ///
    /// # Errors
    /// Bad patterns, ranges or rules.
    pub fn new(config: GateConfig) -> Result<Self, GateError> {
        Ok(Self {
            bots: BotDetector::new(config.bots)?,
            policies: PolicySet::default(),
            limiter: RateLimiter::new(config.rate_limits)?,
            sweep_every: Duration::from_secs(config.sweep_interval_secs.max(1)),
            session_idle: Duration::from_secs(config.session_idle_secs.max(1)),
            last_sweep: Mutex::new(Instant::now()),
        })
    }

    /// Replace the policy set
    #[must_use]
    pub fn with_policies(mut self, policies: PolicySet) -> Self {
        self.policies = policies;
        self
    }

    /// Bot detector
    #[inline]
    #[must_use]
    pub fn bots(&self) -> &BotDetector {
        &self.bots
    }

    /// Rate limiter
    #[inline]
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Throttle and classify a request
    ///
    /// # Errors
    /// [`BazaarError::RateLimited`] when the class window is full.
    pub fn admit(
        &self,
        class: EndpointClass,
        request: &GateRequest<'_>,
    ) -> Result<Admission, BazaarError> {
        self.sweep_if_due();
        let rate = self.limiter.check(class, &request.subject())?;
        let bot = self.bots.detect(request.client, &request.timing);
        Ok(Admission { bot, rate })
    }

    /// Drop expired rate windows and idle sessions
    pub fn sweep(&self) {
        let windows = self.limiter.tracked();
        let sessions = self.bots.tracked_sessions();
        self.limiter.prune();
        self.bots.prune_sessions(self.session_idle);
        tracing::debug!(
            windows_dropped = windows.saturating_sub(self.limiter.tracked()),
            sessions_dropped = sessions.saturating_sub(self.bots.tracked_sessions()),
            "gate sweep"
        );
    }

    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let Some(mut last) = self.last_sweep.try_lock() else {
                return;
            };
            if now.saturating_duration_since(*last) < self.sweep_every {
                return;
            }
            *last = now;
        }
        self.sweep();
    }

    /// Evaluate write and read policies
    ///
    /// # Errors
    /// Forbidden or not-found refusal.
    pub fn authorize(
        &self,
        action: Action,
        product: &Product,
        actor: &Actor,
    ) -> Result<(), BazaarError> {
        self.policies.check(action, product, actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{KeyBy, RateLimitRule};
    use bazaar_model::{CategoryId, ProductId};

    fn browser() -> ClientInfo {
        ClientInfo::new()
            .with_ip("198.51.100.7".parse().unwrap())
            .with_header("User-Agent", "Mozilla/5.0 Firefox/130.0")
            .with_header("Accept", "*/*")
            .with_header("Accept-Language", "en")
            .with_header("Accept-Encoding", "gzip")
    }

    #[tokio::test]
    async fn bots_are_admitted_and_flagged() {
        let gate = AbuseGate::new(GateConfig::default()).unwrap();
        let client = browser().with_header("User-Agent", "Mozilla/5.0 (compatible; Googlebot/2.1)");
        let admission = gate
            .admit(EndpointClass::View, &GateRequest::new(&client))
            .unwrap();
        assert!(admission.is_bot());
        assert!(!gate
            .admit(EndpointClass::View, &GateRequest::new(&browser()))
            .unwrap()
            .is_bot());
    }

    #[tokio::test]
    async fn throttle_precedes_classification() {
        let config = GateConfig {
            rate_limits: RateLimitTable::default()
                .with(EndpointClass::Login, RateLimitRule::new(60, 1, KeyBy::IdentifierOrIp)),
            ..GateConfig::default()
        };
        let gate = AbuseGate::new(config).unwrap();
        let client = browser();
        let request = GateRequest::new(&client).with_identifier("ada@example.com");
        assert!(gate.admit(EndpointClass::Login, &request).is_ok());
        let err = gate.admit(EndpointClass::Login, &request).unwrap_err();
        assert!(err.retry_after().is_some_and(|s| s >= 1));

        let other = GateRequest::new(&client).with_identifier("bob@example.com");
        assert!(gate.admit(EndpointClass::Login, &other).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_and_idle_sessions_are_swept() {
        let gate = AbuseGate::new(GateConfig {
            session_idle_secs: 120,
            ..GateConfig::default()
        })
        .unwrap();
        for host in 1..=40u8 {
            let client = browser()
                .with_ip(std::net::IpAddr::from([203, 0, 113, host]))
                .with_session(format!("s{host}"));
            gate.admit(EndpointClass::View, &GateRequest::new(&client)).unwrap();
        }
        assert_eq!(gate.limiter().tracked(), 40);
        assert_eq!(gate.bots().tracked_sessions(), 40);

        // view windows last a minute; sessions stay until idle for two
        tokio::time::advance(Duration::from_secs(61)).await;
        gate.admit(EndpointClass::View, &GateRequest::new(&browser())).unwrap();
        assert_eq!(gate.limiter().tracked(), 1);
        assert_eq!(gate.bots().tracked_sessions(), 40);

        tokio::time::advance(Duration::from_secs(120)).await;
        gate.admit(EndpointClass::View, &GateRequest::new(&browser())).unwrap();
        assert_eq!(gate.limiter().tracked(), 1);
        assert_eq!(gate.bots().tracked_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_windows_survive_a_sweep() {
        let gate = AbuseGate::new(GateConfig::default()).unwrap();
        let client = browser();
        let request = GateRequest::new(&client).with_identifier("ada@example.com");
        gate.admit(EndpointClass::Login, &request).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        gate.sweep();
        assert_eq!(gate.limiter().tracked(), 1);
        let decision = gate.admit(EndpointClass::Login, &request).unwrap().rate;
        assert_eq!(decision.remaining, 8);
    }

    #[test]
    fn authorize_uses_policies() {
        let gate = AbuseGate::new(GateConfig::default()).unwrap();
        let product = Product::new(
            ProductId::from("p1"),
            "notes",
            UserId::from("maker"),
            CategoryId::from("tools"),
        );
        let maker = Actor::user(UserId::from("maker"));
        assert!(gate.authorize(Action::Upvote, &product, &maker).is_err());

        let permissive = AbuseGate::new(GateConfig::default())
            .unwrap()
            .with_policies(PolicySet::empty());
        assert!(permissive.authorize(Action::Upvote, &product, &maker).is_ok());
    }
}
