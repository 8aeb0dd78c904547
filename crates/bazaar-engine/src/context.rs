//! Per-request context
//!
//! Carries who is calling, what the transport saw, how long the request may
//! run and how to stop it. Built once at the edge and passed by reference
//! through every engine operation.

use bazaar_gate::Actor;
use bazaar_model::{ClientInfo, CycleId, UserId};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cooperative cancellation flag shared by a request and its sub-tasks
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create an untriggered token
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Trigger cancellation for every clone
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was triggered
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is triggered
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so the channel cannot close first.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// User id
    pub id: UserId,
    /// Admin rights
    pub is_admin: bool,
}

impl UserContext {
    /// Regular user
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
        }
    }

    /// Grant admin rights
    #[inline]
    #[must_use]
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// Everything an engine operation needs to know about its caller
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated caller
    pub user: Option<UserContext>,
    /// Transport facts
    pub client: ClientInfo,
    /// Absolute deadline
    pub deadline: Instant,
    /// Cancellation
    pub cancel: CancelToken,
    /// Page render this request belongs to
    pub cycle_id: Option<CycleId>,
    /// Set by the gate once the caller is classified as automated
    pub is_bot: bool,
}

impl RequestContext {
    /// Anonymous request with `budget` to run
    #[must_use]
    pub fn new(client: ClientInfo, budget: Duration) -> Self {
        Self {
            user: None,
            client,
            deadline: Instant::now() + budget,
            cancel: CancelToken::new(),
            cycle_id: None,
            is_bot: false,
        }
    }

    /// With authenticated caller
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = Some(user);
        self
    }

    /// With page cycle
    #[inline]
    #[must_use]
    pub fn with_cycle(mut self, cycle: CycleId) -> Self {
        self.cycle_id = Some(cycle);
        self
    }

    /// With cancellation shared with another request
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Caller id
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }

    /// Caller has admin rights
    #[inline]
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin)
    }

    /// Caller id unless the caller is a bot
    ///
    /// Bots are served and cached as anonymous readers.
    #[inline]
    #[must_use]
    pub fn reader(&self) -> Option<&UserId> {
        if self.is_bot {
            None
        } else {
            self.user_id()
        }
    }

    /// Policy actor
    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor {
            user: self.user_id().cloned(),
            is_admin: self.is_admin(),
        }
    }

    /// Time left before the deadline
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline passed
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
