//! Completion registry for outbound confirmable requests.
//!
//! Every confirmable request the device sends can register a pair of
//! handlers keyed by its message id.  When the matching ACK (or RESET)
//! arrives, the dispatch engine resolves the entry; when nothing arrives
//! within the deadline, [`AckHandlerRegistry::update`] fires the error
//! handler with a timeout.
//!
//! Guarantees:
//!
//! - Each message id is tracked at most once.  Registering an id that is
//!   already live displaces the old entry, firing its error handler with
//!   [`ProtocolError::Cancelled`] so it still completes exactly once.
//! - A handler pair fires exactly one of success, error, or timeout.
//! - [`AckHandlerRegistry::clear`] drops all entries without firing
//!   anything; it is used at session boundaries where the old session's
//!   replies can no longer arrive.

use std::collections::HashMap;

use crate::application::channel::ProtocolError;

/// Success continuation of a pending request.
pub type OnSuccess = Box<dyn FnOnce()>;
/// Error continuation of a pending request.
pub type OnError = Box<dyn FnOnce(ProtocolError)>;

struct PendingAck {
    remaining_ms: u64,
    on_success: OnSuccess,
    on_error: OnError,
}

/// Tracks outbound confirmable messages awaiting their reply.
#[derive(Default)]
pub struct AckHandlerRegistry {
    pending: HashMap<u16, PendingAck>,
}

impl AckHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending handler pair for `msg_id` with a deadline
    /// `timeout_ms` from now (on the caller-supplied clock).
    pub fn register(
        &mut self,
        msg_id: u16,
        timeout_ms: u64,
        on_success: OnSuccess,
        on_error: OnError,
    ) {
        let displaced = self.pending.insert(
            msg_id,
            PendingAck {
                remaining_ms: timeout_ms,
                on_success,
                on_error,
            },
        );
        if let Some(old) = displaced {
            (old.on_error)(ProtocolError::Cancelled);
        }
    }

    /// Advances deadline accounting by `elapsed_ms`; every entry whose
    /// deadline expired fires its error handler with
    /// [`ProtocolError::MessageTimeout`] and is removed.
    pub fn update(&mut self, elapsed_ms: u64) {
        let mut expired = Vec::new();
        for (&msg_id, entry) in &mut self.pending {
            entry.remaining_ms = entry.remaining_ms.saturating_sub(elapsed_ms);
            if entry.remaining_ms == 0 {
                expired.push(msg_id);
            }
        }
        for msg_id in expired {
            if let Some(entry) = self.pending.remove(&msg_id) {
                (entry.on_error)(ProtocolError::MessageTimeout);
            }
        }
    }

    /// Resolves `msg_id` successfully, if tracked.
    pub fn set_result(&mut self, msg_id: u16) {
        if let Some(entry) = self.pending.remove(&msg_id) {
            (entry.on_success)();
        }
    }

    /// Resolves `msg_id` with an error, if tracked.
    pub fn set_error(&mut self, msg_id: u16, error: ProtocolError) {
        if let Some(entry) = self.pending.remove(&msg_id) {
            (entry.on_error)(error);
        }
    }

    /// Drops all pending entries without firing handlers.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every completion of one registered handler pair.
    #[derive(Default)]
    struct Outcome {
        successes: u32,
        errors: Vec<ProtocolError>,
    }

    fn handlers(outcome: &Rc<RefCell<Outcome>>) -> (OnSuccess, OnError) {
        let success = Rc::clone(outcome);
        let error = Rc::clone(outcome);
        (
            Box::new(move || success.borrow_mut().successes += 1),
            Box::new(move |e| error.borrow_mut().errors.push(e)),
        )
    }

    #[test]
    fn test_set_result_fires_success_once_and_removes() {
        // Arrange
        let mut registry = AckHandlerRegistry::new();
        let outcome = Rc::new(RefCell::new(Outcome::default()));
        let (on_success, on_error) = handlers(&outcome);
        registry.register(7, 1000, on_success, on_error);

        // Act
        registry.set_result(7);
        registry.set_result(7); // second resolution must be a no-op
        registry.set_error(7, ProtocolError::CoapCode4xx);

        // Assert
        assert_eq!(outcome.borrow().successes, 1);
        assert!(outcome.borrow().errors.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_error_fires_error_once() {
        let mut registry = AckHandlerRegistry::new();
        let outcome = Rc::new(RefCell::new(Outcome::default()));
        let (on_success, on_error) = handlers(&outcome);
        registry.register(9, 1000, on_success, on_error);

        registry.set_error(9, ProtocolError::CoapCode5xx);
        registry.set_result(9);

        assert_eq!(outcome.borrow().successes, 0);
        assert_eq!(outcome.borrow().errors.as_slice(), &[ProtocolError::CoapCode5xx]);
    }

    #[test]
    fn test_update_expires_entries_with_timeout_error() {
        let mut registry = AckHandlerRegistry::new();
        let outcome = Rc::new(RefCell::new(Outcome::default()));
        let (on_success, on_error) = handlers(&outcome);
        registry.register(3, 500, on_success, on_error);

        // Not yet expired after 499 ms.
        registry.update(499);
        assert_eq!(registry.len(), 1);

        // The final millisecond expires it.
        registry.update(1);
        assert!(registry.is_empty());
        assert_eq!(
            outcome.borrow().errors.as_slice(),
            &[ProtocolError::MessageTimeout]
        );
    }

    #[test]
    fn test_update_expiry_survives_clock_jumps() {
        let mut registry = AckHandlerRegistry::new();
        let outcome = Rc::new(RefCell::new(Outcome::default()));
        let (on_success, on_error) = handlers(&outcome);
        registry.register(4, 500, on_success, on_error);

        // A single large elapsed step (missed loop turns) must still expire.
        registry.update(10_000);
        assert_eq!(
            outcome.borrow().errors.as_slice(),
            &[ProtocolError::MessageTimeout]
        );
    }

    #[test]
    fn test_resolved_entry_does_not_time_out_later() {
        let mut registry = AckHandlerRegistry::new();
        let outcome = Rc::new(RefCell::new(Outcome::default()));
        let (on_success, on_error) = handlers(&outcome);
        registry.register(5, 500, on_success, on_error);

        registry.set_result(5);
        registry.update(10_000);

        assert_eq!(outcome.borrow().successes, 1);
        assert!(outcome.borrow().errors.is_empty());
    }

    #[test]
    fn test_clear_drops_without_firing() {
        let mut registry = AckHandlerRegistry::new();
        let outcome = Rc::new(RefCell::new(Outcome::default()));
        let (on_success, on_error) = handlers(&outcome);
        registry.register(6, 500, on_success, on_error);

        registry.clear();
        registry.update(10_000);

        assert_eq!(outcome.borrow().successes, 0);
        assert!(outcome.borrow().errors.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_register_displaces_old_entry_with_cancelled() {
        let mut registry = AckHandlerRegistry::new();
        let old = Rc::new(RefCell::new(Outcome::default()));
        let new = Rc::new(RefCell::new(Outcome::default()));
        let (old_success, old_error) = handlers(&old);
        let (new_success, new_error) = handlers(&new);

        registry.register(8, 500, old_success, old_error);
        registry.register(8, 500, new_success, new_error);
        registry.set_result(8);

        assert_eq!(old.borrow().errors.as_slice(), &[ProtocolError::Cancelled]);
        assert_eq!(old.borrow().successes, 0);
        assert_eq!(new.borrow().successes, 1);
    }

    #[test]
    fn test_independent_entries_resolve_independently() {
        let mut registry = AckHandlerRegistry::new();
        let a = Rc::new(RefCell::new(Outcome::default()));
        let b = Rc::new(RefCell::new(Outcome::default()));
        let (a_success, a_error) = handlers(&a);
        let (b_success, b_error) = handlers(&b);

        registry.register(1, 500, a_success, a_error);
        registry.register(2, 5000, b_success, b_error);

        registry.set_result(2);
        registry.update(600);

        assert_eq!(a.borrow().errors.as_slice(), &[ProtocolError::MessageTimeout]);
        assert_eq!(b.borrow().successes, 1);
    }
}
