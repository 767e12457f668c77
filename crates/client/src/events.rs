//! Session event channel.
//!
//! The session manager announces identity and cart changes here instead of
//! reaching into the cart store directly. Two kinds of listeners exist:
//!
//! - [`SessionObserver`]s run inline, before [`SessionEvents::emit`] returns.
//!   The cart store is one, so a cart pushed during login is visible the
//!   moment `login` resolves.
//! - UI tasks call [`SessionEvents::subscribe`] and receive events through a
//!   `tokio::sync::broadcast` channel at their own pace.

use std::sync::{Arc, PoisonError, RwLock};

use pocketshop_core::{Cart, UserId};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the broadcast channel for asynchronous listeners.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something that changed about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session and its persisted keys were cleared.
    Cleared,
    /// A user signed in.
    SignedIn {
        /// The new user.
        user_id: UserId,
    },
    /// The server reports a different user than the one cached locally.
    UserChanged {
        /// The user the server now reports.
        user_id: UserId,
    },
    /// Fresh server cart for a user, to be applied wholesale.
    CartUpdated {
        /// Owner of the cart.
        user_id: UserId,
        /// The complete cart.
        cart: Cart,
    },
    /// The user's profile changed.
    ProfileUpdated {
        /// The user whose profile changed.
        user_id: UserId,
    },
    /// The server rejected the token during normal operation.
    ExpiredSession,
}

impl SessionEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Cleared => "cleared",
            Self::SignedIn { .. } => "signed_in",
            Self::UserChanged { .. } => "user_changed",
            Self::CartUpdated { .. } => "cart_updated",
            Self::ProfileUpdated { .. } => "profile_updated",
            Self::ExpiredSession => "expired_session",
        }
    }
}

/// Synchronous session listener.
///
/// Implementations must not block: they run on the emitting task.
pub trait SessionObserver: Send + Sync {
    /// Handle an event.
    fn on_event(&self, event: &SessionEvent);
}

/// Fan-out of session events to observers and subscribers.
pub struct SessionEvents {
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    /// Create an event channel with no listeners.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            observers: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Register a synchronous observer.
    pub fn register(&self, observer: Arc<dyn SessionObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Subscribe to events asynchronously.
    ///
    /// Slow receivers lose the oldest events (`RecvError::Lagged`) rather than
    /// blocking the session.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Deliver an event to every observer, then to subscribers.
    pub fn emit(&self, event: SessionEvent) {
        debug!(event = event.kind(), "Session event");

        // Snapshot so observers may register others without deadlocking
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer.on_event(&event);
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field(
                "observers",
                &self
                    .observers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl SessionObserver for Recorder {
        fn on_event(&self, event: &SessionEvent) {
            self.seen.lock().unwrap().push(event.kind());
        }
    }

    #[test]
    fn test_observers_run_before_emit_returns() {
        let events = SessionEvents::new();
        let recorder = Arc::new(Recorder::default());
        events.register(recorder.clone());

        events.emit(SessionEvent::Cleared);
        events.emit(SessionEvent::SignedIn {
            user_id: UserId::new("u1"),
        });

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["cleared", "signed_in"]);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = SessionEvents::new();
        let mut rx = events.subscribe();

        events.emit(SessionEvent::ExpiredSession);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::ExpiredSession);
    }

    #[test]
    fn test_emit_without_listeners() {
        SessionEvents::new().emit(SessionEvent::Cleared);
    }
}
