//! ProductBazar Recommendation & Engagement Engine
//!
//! Ranked product feeds and the engagement writes that feed them:
//! 1. **Reads**: product lists and details, trending, per-strategy
//!    recommendations and search, served through the cache layer and the
//!    [`FeedAssembler`]
//! 2. **Writes**: upvote and bookmark toggles, views, comment counters and
//!    product changes, each committed in the interaction store and then fanned
//!    out by the invalidation bus
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bazaar_engine::prelude::*;
//!
//! let engine = Engine::new(EngineConfig::default(), catalog)?;
//! let mut ctx = engine.context(client).with_user(UserContext::new("u1"));
//!
//! let feed = engine.recommendations(&mut ctx, "personalized", 20, 0).await?;
//! let vote = engine.toggle_upvote(&mut ctx, "notes-app")?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod api;
pub mod assembler;
pub mod config;
pub mod context;
pub mod engine;
pub mod simulate;

pub use api::{
    success_headers, BookmarkResponse, CommentReceipt, ErrorResponse, FeedItem, FeedPage,
    InteractionReceipt, InteractionRequest, InteractionType, ListQuery, ProductDetail,
    ProductListPage, ProductPatch, Served, TimeRange, UpvoteResponse,
};
pub use assembler::{FeedAssembler, FeedRequest, Surface};
pub use config::{CacheConfig, ConfigError, EngineConfig, FetchConfig, TimeoutConfig};
pub use context::{CancelToken, RequestContext, UserContext};
pub use engine::{Engine, EngineStats};
pub use simulate::{run_simulation, SimulationConfig, SimulationReport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::api::{FeedPage, InteractionRequest, ListQuery, TimeRange};
    pub use crate::assembler::FeedRequest;
    pub use crate::config::EngineConfig;
    pub use crate::context::{RequestContext, UserContext};
    pub use crate::engine::Engine;
    pub use bazaar_model::{BazaarError, BazaarResult, ClientInfo, ProductId, UserId};
    pub use bazaar_scoring::Strategy;
}
