//! Interaction records

use crate::ids::{ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Product page or card viewed
    View,
    /// Upvote activated
    Upvote,
    /// Bookmark activated
    Bookmark,
    /// Comment posted
    Comment,
    /// Upvote revoked
    RemoveUpvote,
    /// Bookmark revoked
    RemoveBookmark,
}

impl InteractionKind {
    /// Whether this kind belongs to the toggleable upvote/bookmark family
    #[inline]
    #[must_use]
    pub fn is_toggle(&self) -> bool {
        matches!(
            self,
            Self::Upvote | Self::Bookmark | Self::RemoveUpvote | Self::RemoveBookmark
        )
    }
}

/// Client-side behaviour captured with a view, used for abuse scoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSignals {
    /// Time on page in milliseconds
    pub duration_ms: u64,
    /// Scroll events
    pub scrolls: u32,
    /// Mouse move events
    pub mouse_moves: u32,
    /// Key events
    pub key_events: u32,
}

impl ViewSignals {
    /// No human interaction recorded at all
    #[inline]
    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.scrolls == 0 && self.mouse_moves == 0 && self.key_events == 0
    }
}

/// Free-form interaction metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionMetadata {
    /// Surface that produced the interaction (feed name, search, …)
    pub source: Option<String>,
    /// Position in the surface
    pub position: Option<u32>,
    /// Client session
    pub session: Option<String>,
    /// View signals
    pub signals: Option<ViewSignals>,
    /// Marked as automated traffic by the abuse gate
    pub is_bot: bool,
}

/// One interaction in the append-only log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    /// Actor (anonymous views carry none)
    pub user: Option<UserId>,
    /// Target product
    pub product: ProductId,
    /// Kind
    pub kind: InteractionKind,
    /// Commit timestamp
    pub at: DateTime<Utc>,
    /// Metadata
    pub metadata: InteractionMetadata,
}

impl Interaction {
    /// Create interaction at `at`
    #[inline]
    #[must_use]
    pub fn new(
        user: Option<UserId>,
        product: ProductId,
        kind: InteractionKind,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user,
            product,
            kind,
            at,
            metadata: InteractionMetadata::default(),
        }
    }

    /// With metadata
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: InteractionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    /// Whether the (user, product) record is active after the toggle
    pub now_active: bool,
    /// Counter value after the toggle
    pub new_count: u64,
    /// Per-product commit sequence number
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&InteractionKind::RemoveBookmark).unwrap(),
            "\"remove_bookmark\""
        );
        let kind: InteractionKind = serde_json::from_str("\"view\"").unwrap();
        assert_eq!(kind, InteractionKind::View);
    }

    #[test]
    fn inert_signals() {
        assert!(ViewSignals::default().is_inert());
        let busy = ViewSignals {
            scrolls: 3,
            ..ViewSignals::default()
        };
        assert!(!busy.is_inert());
    }
}
