//! ProductBazar Model
//!
//! Plain value types shared by every engine component:
//! - Identifiers ([`ProductId`], [`UserId`], [`CategoryId`], [`CycleId`], [`ConnectionId`])
//! - Catalog records ([`Product`], [`User`]) and derived [`Counters`]
//! - Interactions and toggle outcomes
//! - Scoring candidates ([`Candidate`]) and ephemeral [`ScoreDetail`]
//! - The engine-wide error kinds ([`BazaarError`]) and their wire envelope
//!
//! The scoring kernel consumes these records and knows nothing about the
//! backing store that produced them.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod candidate;
pub mod error;
pub mod ids;
pub mod interaction;
pub mod product;
pub mod request;
pub mod score;
pub mod user;

pub use candidate::{Candidate, CategorySummary, MakerSummary, RecentActivity};
pub use error::{BazaarError, BazaarResult, ErrorEnvelope};
pub use ids::{CategoryId, ConnectionId, CycleId, ProductId, UserId};
pub use interaction::{
    Interaction, InteractionKind, InteractionMetadata, ToggleOutcome, ViewSignals,
};
pub use product::{Counters, Product, ProductStatus, Visibility};
pub use request::ClientInfo;
pub use score::{Component, ScoreComponents, ScoreDetail};
pub use user::{PersonalContext, Preferences, Role, User, UserFlags};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with engine records
    pub use crate::{
        BazaarError, BazaarResult, Candidate, CategoryId, Counters, Interaction,
        InteractionKind, PersonalContext, Product, ProductId, ProductStatus, ScoreDetail, User,
        UserId,
    };
}
