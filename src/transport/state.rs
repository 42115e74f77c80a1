//! Connection state machine.
//!
//! ```text
//!        scan ┌──────────┐ found / not found
//!     ┌──────►│ Scanning │──────────┐
//!     │       └──────────┘          │
//! ┌───┴──────────┐                  │
//! │ Disconnected │◄─────────────────┘
//! └───┬──────────┘◄────────────────────────────┐
//!     │ connect   ┌────────────┐  fail          │
//!     └──────────►│ Connecting │────────────────┤
//!                 └─────┬──────┘                │
//!                       │ subscribed            │ disconnect /
//!                 ┌─────▼──────┐                │ link lost
//!                 │ Connected  │────────────────┘
//!                 └────────────┘
//! ```
//!
//! Exactly one state at a time. Only the owning
//! [`Connection`](super::Connection) drives transitions; everyone else
//! observes through listeners.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the single peer link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link. Initial state.
    #[default]
    Disconnected,
    /// Looking for an advertising peer.
    Scanning,
    /// Link opening, MTU and subscription in progress.
    Connecting,
    /// Link usable for requests.
    Connected,
}

impl ConnectionState {
    /// Returns `true` if requests may be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Returns `true` if moving to `next` is a legal transition.
    ///
    /// Every state may fall back to `Disconnected`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (_, Disconnected) | (Disconnected, Scanning) | (Disconnected, Connecting) | (Connecting, Connected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

// ============================================================================
// StateChange
// ============================================================================

/// A transition delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub from: ConnectionState,
    /// State after the transition.
    pub to: ConnectionState,
}

/// Listener callback type.
///
/// Invoked synchronously on the task that performed the transition; must
/// not block.
pub type StateListener = Arc<dyn Fn(StateChange) + Send + Sync>;

// ============================================================================
// ConnectionStateMachine
// ============================================================================

struct StateInner {
    state: ConnectionState,
    listeners: FxHashMap<SubscriptionId, StateListener>,
}

/// Holds the current [`ConnectionState`] and its observers.
pub struct ConnectionStateMachine {
    inner: Mutex<StateInner>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                state: ConnectionState::Disconnected,
                listeners: FxHashMap::default(),
            }),
        }
    }
}

impl fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ConnectionStateMachine")
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl ConnectionStateMachine {
    /// Creates a machine in `Disconnected`.
    #[inline]
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn current(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Registers a listener invoked on every transition.
    ///
    /// The listener stays registered until the returned handle is dropped
    /// or [`StateSubscription::unsubscribe`] is called.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> StateSubscription
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.inner.lock().listeners.insert(id, Arc::new(listener));
        trace!(%id, "State listener registered");

        StateSubscription {
            id,
            machine: Arc::downgrade(self),
        }
    }

    fn remove_listener(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.lock().listeners.remove(&id).is_some();
        if removed {
            trace!(%id, "State listener removed");
        }
        removed
    }

    /// Moves to `next`.
    ///
    /// Returns `Ok(false)` without notifying if already in `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the transition is not legal.
    pub(crate) fn transition(&self, next: ConnectionState) -> Result<bool> {
        self.apply(next, |_| true)
    }

    /// Moves to `next` only if currently in `expected`.
    pub(crate) fn transition_from(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        self.apply(next, |current| current == expected)
            .unwrap_or(false)
    }

    fn apply(
        &self,
        next: ConnectionState,
        guard: impl FnOnce(ConnectionState) -> bool,
    ) -> Result<bool> {
        let (change, listeners) = {
            let mut inner = self.inner.lock();
            let from = inner.state;

            if from == next || !guard(from) {
                return Ok(false);
            }
            if !from.can_transition_to(next) {
                return Err(Error::protocol(format!(
                    "illegal connection transition {from} -> {next}"
                )));
            }

            inner.state = next;
            let listeners: Vec<StateListener> = inner.listeners.values().cloned().collect();
            (StateChange { from, to: next }, listeners)
        };

        // Listeners run outside the lock so they may query the machine.
        debug!(from = %change.from, to = %change.to, "Connection state changed");
        for listener in listeners {
            listener(change);
        }

        Ok(true)
    }

    /// Forces `Disconnected` from any active state.
    ///
    /// Returns `true` if a transition happened.
    pub(crate) fn force_disconnected(&self) -> bool {
        self.transition(ConnectionState::Disconnected)
            .unwrap_or(false)
    }
}

// ============================================================================
// StateSubscription
// ============================================================================

/// Handle for a registered state listener.
///
/// Dropping the handle unregisters the listener.
#[must_use = "dropping the subscription unregisters the listener"]
#[derive(Debug)]
pub struct StateSubscription {
    id: SubscriptionId,
    machine: Weak<ConnectionStateMachine>,
}

impl StateSubscription {
    /// Returns the subscription ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unregisters the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        if let Some(machine) = self.machine.upgrade() {
            machine.remove_listener(self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use ConnectionState::*;

    fn recorder(machine: &Arc<ConnectionStateMachine>) -> (StateSubscription, Arc<Mutex<Vec<StateChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = machine.subscribe(move |change| sink.lock().push(change));
        (sub, seen)
    }

    #[test]
    fn test_initial_state() {
        let machine = ConnectionStateMachine::new();
        assert_eq!(machine.current(), Disconnected);
        assert!(!machine.current().is_connected());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(Disconnected.can_transition_to(Scanning));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Scanning.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Scanning.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_listener_sees_every_transition() {
        let machine = ConnectionStateMachine::new();
        let (_sub, seen) = recorder(&machine);

        machine.transition(Connecting).expect("legal");
        machine.transition(Connected).expect("legal");
        machine.transition(Disconnected).expect("legal");

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                StateChange { from: Disconnected, to: Connecting },
                StateChange { from: Connecting, to: Connected },
                StateChange { from: Connected, to: Disconnected },
            ]
        );
    }

    #[test]
    fn test_same_state_is_silent() {
        let machine = ConnectionStateMachine::new();
        let (_sub, seen) = recorder(&machine);

        assert!(!machine.transition(Disconnected).expect("no-op"));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let machine = ConnectionStateMachine::new();
        let err = machine.transition(Connected).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(machine.current(), Disconnected);
    }

    #[test]
    fn test_transition_from_guard() {
        let machine = ConnectionStateMachine::new();
        assert!(!machine.transition_from(Connected, Disconnected));

        machine.transition(Connecting).expect("legal");
        assert!(machine.transition_from(Connecting, Connected));
        assert_eq!(machine.current(), Connected);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let machine = ConnectionStateMachine::new();
        let (sub, seen) = recorder(&machine);
        assert_eq!(machine.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(machine.listener_count(), 0);

        machine.transition(Scanning).expect("legal");
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_force_disconnected() {
        let machine = ConnectionStateMachine::new();
        assert!(!machine.force_disconnected());

        machine.transition(Connecting).expect("legal");
        assert!(machine.force_disconnected());
        assert_eq!(machine.current(), Disconnected);
    }
}
