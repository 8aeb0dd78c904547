//! Request and response bodies of the engine operations
//!
//! Field names follow the public wire format (camelCase).

use bazaar_cache::Freshness;
use bazaar_gate::{rejection_headers, RateDecision};
use bazaar_model::{
    BazaarError, Candidate, CategoryId, ErrorEnvelope, InteractionMetadata, ProductId,
    ProductStatus, ViewSignals, Visibility,
};
use bazaar_scoring::Strategy;
use bazaar_store::{SortOrder, UserInteractionState};
use serde::{Deserialize, Serialize};

/// One ranked product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    /// Enriched product
    pub product: Candidate,
    /// Final score in `[0.01, 1]`
    pub score: f64,
    /// Strategy that ranked it
    pub reason: String,
    /// Sentence built from the dominant component
    pub explanation: String,
}

/// A ranked page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    /// Strategy actually used
    pub strategy: Strategy,
    /// Items in rank order
    pub items: Vec<FeedItem>,
    /// Requested page size
    pub limit: u32,
    /// Requested offset
    pub offset: u32,
}

impl FeedPage {
    /// Page with no items
    #[must_use]
    pub fn empty(strategy: Strategy, limit: u32, offset: u32) -> Self {
        Self {
            strategy,
            items: Vec::new(),
            limit,
            offset,
        }
    }

    /// Product ids in rank order
    #[must_use]
    pub fn ids(&self) -> Vec<ProductId> {
        self.items.iter().map(|i| i.product.product.id.clone()).collect()
    }

    /// Number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page has no items
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A value and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    /// Response body
    pub value: T,
    /// Cache state the body was served from
    pub freshness: Freshness,
}

impl<T> Served<T> {
    /// Wrap a value
    #[inline]
    #[must_use]
    pub fn new(value: T, freshness: Freshness) -> Self {
        Self { value, freshness }
    }
}

/// `GET /products` query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListQuery {
    /// 1-based page
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Sort order
    pub sort: SortOrder,
    /// Category filter
    pub category: Option<CategoryId>,
    /// Any-of tag filter
    pub tags: Vec<String>,
    /// Free-text filter
    pub search: Option<String>,
    /// Status filter; honored for admins only
    pub status: Option<ProductStatus>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            sort: SortOrder::Newest,
            category: None,
            tags: Vec::new(),
            search: None,
            status: None,
        }
    }
}

/// `GET /products` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListPage {
    /// Products on this page
    pub products: Vec<Candidate>,
    /// 1-based page
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Whether another page exists
    pub has_more: bool,
}

/// `GET /products/{slug}` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    /// Enriched product
    pub product: Candidate,
    /// Caller's active toggles, for authenticated callers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_interactions: Option<UserInteractionState>,
}

/// Trending window of `GET /products/trending`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    /// Last day
    #[serde(rename = "1d")]
    Day,
    /// Last week
    #[default]
    #[serde(rename = "7d")]
    Week,
    /// Last month
    #[serde(rename = "30d")]
    Month,
}

impl TimeRange {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "1d",
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }

    /// Window length in days
    #[must_use]
    pub const fn days(self) -> u32 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = BazaarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(BazaarError::validation(format!(
                "timeRange must be one of 1d, 7d, 30d, got {other}"
            ))),
        }
    }
}

/// `POST /products/{slug}/upvote` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpvoteResponse {
    /// Always true on success
    pub success: bool,
    /// Caller's upvote is active after the toggle
    pub upvoted: bool,
    /// Count after the toggle
    pub upvote_count: u64,
}

/// `POST /products/{slug}/bookmark` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkResponse {
    /// Always true on success
    pub success: bool,
    /// Caller's bookmark is active after the toggle
    pub bookmarked: bool,
    /// Count after the toggle
    pub bookmark_count: u64,
}

/// Kind accepted by `POST /interactions`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    /// Product page view; counted
    View,
    /// Product shown in a list; acknowledged, not counted
    Impression,
}

/// `POST /interactions` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRequest {
    /// Product id
    pub product_id: ProductId,
    /// Interaction kind
    #[serde(rename = "type")]
    pub kind: InteractionType,
    /// Surface that showed the product
    #[serde(default)]
    pub source: Option<String>,
    /// Rank on that surface
    #[serde(default)]
    pub position: Option<u32>,
    /// Client-reported engagement signals
    #[serde(default)]
    pub metadata: Option<ViewSignals>,
}

impl InteractionRequest {
    /// View of `product`
    #[must_use]
    pub fn view(product: impl Into<ProductId>) -> Self {
        Self {
            product_id: product.into(),
            kind: InteractionType::View,
            source: None,
            position: None,
            metadata: None,
        }
    }

    /// With engagement signals
    #[inline]
    #[must_use]
    pub fn with_signals(mut self, signals: ViewSignals) -> Self {
        self.metadata = Some(signals);
        self
    }

    /// With surface and rank
    #[inline]
    #[must_use]
    pub fn from_source(mut self, source: impl Into<String>, position: u32) -> Self {
        self.source = Some(source.into());
        self.position = Some(position);
        self
    }

    /// Store metadata for this request
    #[must_use]
    pub fn to_metadata(&self, session: Option<&str>, is_bot: bool) -> InteractionMetadata {
        InteractionMetadata {
            source: self.source.clone(),
            position: self.position,
            session: session.map(str::to_string),
            signals: self.metadata,
            is_bot,
        }
    }
}

/// `POST /interactions` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionReceipt {
    /// Always true when accepted
    pub success: bool,
    /// Whether the interaction moved a counter
    pub counted: bool,
    /// Caller classified as automated
    pub is_bot: bool,
    /// View count after the write
    pub view_count: u64,
    /// Distinct viewers after the write
    pub unique_viewer_count: u64,
}

/// Comment counter change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentReceipt {
    /// Comment id
    pub comment_id: u64,
    /// Count after the write
    pub comment_count: u64,
}

/// Product fields a maker or admin may change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductPatch {
    /// New name
    pub name: Option<String>,
    /// New tagline
    pub tagline: Option<String>,
    /// New slug
    pub slug: Option<String>,
    /// Replacement tag set
    pub tags: Option<Vec<String>>,
    /// New status
    pub status: Option<ProductStatus>,
    /// New visibility
    pub visibility: Option<Visibility>,
    /// New price
    pub price: Option<f64>,
    /// Lock or unlock; admins only
    pub locked: Option<bool>,
}

impl ProductPatch {
    /// Whether no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Changed fields as pushed to subscribers
    #[must_use]
    pub fn updates(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(
                map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            ),
            _ => serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Error response: status, headers and envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// HTTP status
    pub status: u16,
    /// Extra headers
    pub headers: Vec<(&'static str, String)>,
    /// Body
    pub body: ErrorEnvelope,
}

impl ErrorResponse {
    /// Render `err`; rate limits carry `limit` in their headers
    #[must_use]
    pub fn from_error(err: &BazaarError, limit: Option<u32>) -> Self {
        let headers = match (err, err.retry_after()) {
            (BazaarError::RateLimited { retry_after_secs }, _) => {
                rejection_headers(limit.unwrap_or(0), *retry_after_secs)
            }
            (_, Some(retry_after)) => vec![("Retry-After", retry_after.to_string())],
            _ => Vec::new(),
        };
        Self {
            status: err.http_status(),
            headers,
            body: err.envelope(),
        }
    }

    /// Header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Successful guarded response headers
#[must_use]
pub fn success_headers(decision: &RateDecision) -> Vec<(&'static str, String)> {
    decision.headers()
}
