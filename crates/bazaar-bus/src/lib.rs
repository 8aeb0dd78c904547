//! ProductBazar Invalidation Bus
//!
//! Turns committed writes into cache purges and live push events:
//! - [`plan`] maps a [`WriteEvent`] to an [`InvalidationPlan`]
//! - [`InvalidationBus`] applies plans against attached caches and fans
//!   events out to per-product subscriptions over bounded queues
//! - [`PushSink`] is the transport seam for client connections

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod bus;
pub mod error;
pub mod event;
pub mod plan;
pub mod sink;

pub use bus::{BusConfig, BusStats, CachePurger, InvalidationBus, PublishReport};
pub use error::BusError;
pub use event::{Action, ClientMessage, EventKind, PushEvent};
pub use plan::{plan, product_tag, InvalidationPlan, WriteEvent};
pub use sink::{ChannelSink, PushSink};
