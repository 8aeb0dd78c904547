//! ProductBazar Abuse Gate
//!
//! Guards interaction writes and expensive reads:
//! - [`BotDetector`]: user-agent, range, header and timing signals
//! - [`PolicySet`]: self-interaction, lock, visibility and status rules
//! - [`RateLimiter`]: per-class sliding windows keyed by user, address or
//!   body identifier
//!
//! [`AbuseGate`] composes the three.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod bot;
pub mod error;
pub mod gate;
pub mod policy;
pub mod ratelimit;

pub use bot::{BotDetector, BotSignal, BotSignalConfig, BotVerdict, IpRange, RequestTiming};
pub use error::GateError;
pub use gate::{AbuseGate, Admission, GateConfig, GateRequest};
pub use policy::{Action, Actor, Policy, PolicySet};
pub use ratelimit::{
    rejection_headers, EndpointClass, KeyBy, RateDecision, RateLimitRule, RateLimitTable,
    RateLimiter, RateSubject,
};
