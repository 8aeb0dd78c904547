//! Push events and client control messages

use bazaar_model::{ProductId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Push event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Upvote toggled
    #[serde(rename = "product:upvote")]
    Upvote,
    /// Bookmark toggled
    #[serde(rename = "product:bookmark")]
    Bookmark,
    /// Product fields changed
    #[serde(rename = "product:update")]
    Update,
}

impl EventKind {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upvote => "product:upvote",
            Self::Bookmark => "product:bookmark",
            Self::Update => "product:update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Toggle direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Record became active
    Add,
    /// Record was revoked
    Remove,
}

impl Action {
    /// From the post-toggle state
    #[inline]
    #[must_use]
    pub const fn from_active(now_active: bool) -> Self {
        if now_active {
            Self::Add
        } else {
            Self::Remove
        }
    }
}

/// Server-to-client notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    /// Event kind
    pub kind: EventKind,
    /// Product concerned
    pub product_id: ProductId,
    /// Product slug, for clients that filter by slug
    pub slug: String,
    /// Toggle direction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Counter value after the write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Acting user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Changed fields for `product:update`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<serde_json::Value>,
    /// Per-product commit sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl PushEvent {
    /// Toggle event
    #[must_use]
    pub fn toggle(
        kind: EventKind,
        product_id: ProductId,
        slug: impl Into<String>,
        now_active: bool,
        count: u64,
        user_id: UserId,
    ) -> Self {
        Self {
            kind,
            product_id,
            slug: slug.into(),
            action: Some(Action::from_active(now_active)),
            count: Some(count),
            user_id: Some(user_id),
            updates: None,
            seq: None,
        }
    }

    /// `product:update` event
    #[must_use]
    pub fn update(product_id: ProductId, slug: impl Into<String>, updates: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Update,
            product_id,
            slug: slug.into(),
            action: None,
            count: None,
            user_id: None,
            updates: Some(updates),
            seq: None,
        }
    }

    /// Attach commit sequence
    #[inline]
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// Client control message: `{"subscribe": id}` or `{"unsubscribe": id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Start receiving events for a product
    Subscribe(ProductId),
    /// Stop receiving events for a product
    Unsubscribe(ProductId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_event_wire_shape() {
        let event = PushEvent::toggle(
            EventKind::Upvote,
            ProductId::from("p1"),
            "notes",
            true,
            11,
            UserId::from("u1"),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "product:upvote",
                "productId": "p1",
                "slug": "notes",
                "action": "add",
                "count": 11,
                "userId": "u1"
            })
        );
    }

    #[test]
    fn update_event_carries_updates() {
        let event = PushEvent::update(
            ProductId::from("p1"),
            "notes",
            serde_json::json!({"name": "Notes 2"}),
        )
        .with_seq(4);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "product:update");
        assert_eq!(json["updates"]["name"], "Notes 2");
        assert_eq!(json["seq"], 4);
        assert!(json.get("action").is_none());
    }

    #[test]
    fn client_messages_parse() {
        let msg: ClientMessage = serde_json::from_str(r#"{"subscribe":"p9"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe(ProductId::from("p9")));
        let msg: ClientMessage = serde_json::from_str(r#"{"unsubscribe":"p9"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unsubscribe(ProductId::from("p9")));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"join":"p9"}"#).is_err());
    }
}
