//! Cache key grammar
//!
//! Every cache key and every invalidation pattern is built here, so lookups
//! and purges agree on the segment layout. Segments are joined by `:`; any
//! `:` inside a caller-supplied segment is replaced by `_`.

use bazaar_model::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Known key prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPrefix {
    /// `products:list:{userPart}:{page}:{limit}:{queryHash}`
    ProductsList,
    /// `products:detail:{slug}:{userPart}`
    ProductsDetail,
    /// `products:trending:{window}:{limit}`
    ProductsTrending,
    /// `recommendations:{strategy}:{userPart}:{limit}:{offset}`
    Recommendations,
    /// `rec:{strategy}:{queryHash}:{userPart}:{limit}:{offset}`
    Rec,
    /// `search:{userPart}:{queryHash}:{page}:{limit}`
    Search,
}

impl KeyPrefix {
    /// All prefixes
    pub const ALL: [KeyPrefix; 6] = [
        KeyPrefix::ProductsList,
        KeyPrefix::ProductsDetail,
        KeyPrefix::ProductsTrending,
        KeyPrefix::Recommendations,
        KeyPrefix::Rec,
        KeyPrefix::Search,
    ];

    /// Literal prefix text
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProductsList => "products:list",
            Self::ProductsDetail => "products:detail",
            Self::ProductsTrending => "products:trending",
            Self::Recommendations => "recommendations",
            Self::Rec => "rec",
            Self::Search => "search",
        }
    }

    /// Prefix of `key`, if it is one of ours
    #[must_use]
    pub fn of(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|prefix| {
            key.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
        })
    }

    /// Pattern matching every key under this prefix
    #[must_use]
    pub fn all_pattern(self) -> String {
        format!("{}:*", self.as_str())
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User segment of a key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserPart {
    /// Anonymous callers and bots
    Anon,
    /// Authenticated caller
    User(UserId),
}

impl UserPart {
    /// From an optional caller
    #[must_use]
    pub fn from_user(user: Option<&UserId>) -> Self {
        user.map_or(Self::Anon, |u| Self::User(u.clone()))
    }
}

impl fmt::Display for UserPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anon => f.write_str("anon"),
            Self::User(id) => write!(f, "u_{}", segment(id.as_str())),
        }
    }
}

/// Escape a caller-supplied segment
#[must_use]
pub fn segment(raw: &str) -> String {
    raw.replace(':', "_")
}

/// Short stable hash of a query fingerprint
#[must_use]
pub fn query_hash(fingerprint: &str) -> String {
    let digest = blake3::hash(fingerprint.as_bytes());
    hex::encode(&digest.as_bytes()[..8])
}

/// `products:list:{userPart}:{page}:{limit}:{queryHash}`
#[must_use]
pub fn products_list(user: &UserPart, page: u32, limit: u32, query_hash: &str) -> String {
    format!("products:list:{user}:{page}:{limit}:{query_hash}")
}

/// `products:detail:{slug}:{userPart}`
#[must_use]
pub fn product_detail(slug: &str, user: &UserPart) -> String {
    format!("products:detail:{}:{user}", segment(slug))
}

/// `products:trending:{window}:{limit}`
#[must_use]
pub fn products_trending(window: &str, limit: u32) -> String {
    format!("products:trending:{}:{limit}", segment(window))
}

/// `recommendations:{strategy}:{userPart}:{limit}:{offset}`
#[must_use]
pub fn recommendations(strategy: &str, user: &UserPart, limit: u32, offset: u32) -> String {
    format!("recommendations:{strategy}:{user}:{limit}:{offset}")
}

/// `rec:{strategy}:{queryHash}:{userPart}:{limit}:{offset}`
#[must_use]
pub fn rec(strategy: &str, query_hash: &str, user: &UserPart, limit: u32, offset: u32) -> String {
    format!("rec:{strategy}:{query_hash}:{user}:{limit}:{offset}")
}

/// `search:{userPart}:{queryHash}:{page}:{limit}`
#[must_use]
pub fn search(user: &UserPart, query_hash: &str, page: u32, limit: u32) -> String {
    format!("search:{user}:{query_hash}:{page}:{limit}")
}

/// Pattern for every detail key of `slug`
#[must_use]
pub fn product_detail_pattern(slug: &str) -> String {
    format!("products:detail:{}:*", segment(slug))
}

/// Fresh and stale lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPair {
    /// Seconds served as fresh
    pub fresh_secs: u64,
    /// Seconds (from insert) served as stale
    pub stale_secs: u64,
}

impl TtlPair {
    /// Create pair
    #[inline]
    #[must_use]
    pub const fn new(fresh_secs: u64, stale_secs: u64) -> Self {
        Self {
            fresh_secs,
            stale_secs,
        }
    }

    /// Fresh lifetime
    #[inline]
    #[must_use]
    pub fn fresh(&self) -> Duration {
        Duration::from_secs(self.fresh_secs)
    }

    /// Stale lifetime
    #[inline]
    #[must_use]
    pub fn stale(&self) -> Duration {
        Duration::from_secs(self.stale_secs.max(self.fresh_secs))
    }
}

/// TTLs per key prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlTable {
    /// Pair per prefix text (`products:list`, `rec`, …)
    pub prefixes: BTreeMap<String, TtlPair>,
    /// Fallback for unknown prefixes
    pub fallback: TtlPair,
}

impl Default for CacheTtlTable {
    fn default() -> Self {
        let prefixes = [
            (KeyPrefix::ProductsList, TtlPair::new(60, 300)),
            (KeyPrefix::ProductsDetail, TtlPair::new(30, 120)),
            (KeyPrefix::ProductsTrending, TtlPair::new(300, 900)),
            (KeyPrefix::Recommendations, TtlPair::new(120, 600)),
            (KeyPrefix::Rec, TtlPair::new(120, 600)),
            (KeyPrefix::Search, TtlPair::new(60, 300)),
        ]
        .into_iter()
        .map(|(prefix, ttl)| (prefix.as_str().to_string(), ttl))
        .collect();
        Self {
            prefixes,
            fallback: TtlPair::new(60, 300),
        }
    }
}

impl CacheTtlTable {
    /// TTLs for `key`
    #[must_use]
    pub fn for_key(&self, key: &str) -> TtlPair {
        KeyPrefix::of(key)
            .and_then(|prefix| self.prefixes.get(prefix.as_str()))
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Override one prefix
    #[must_use]
    pub fn with(mut self, prefix: KeyPrefix, ttl: TtlPair) -> Self {
        self.prefixes.insert(prefix.as_str().to_string(), ttl);
        self
    }
}
