//! Invariant checking for chat view state.
//!
//! Invariants are properties that must hold after every merge, whatever
//! order pushes, polls and sends arrive in. Example-based tests check one
//! interleaving; invariants are checked after each step of all of them.
//!
//! # Architecture
//!
//! Rendered view state is captured into a [`SystemSnapshot`], then every
//! registered [`Invariant`] runs against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SystemSnapshot::from_chat(&view.snapshot());
//! registry.check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{ConversationIsolation, MessagesDeduplicated, MessagesOrdered};
pub use snapshot::{SystemSnapshot, ViewSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against view state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    ///
    /// Returns `Ok(())` if the invariant holds, or a [`Violation`]
    /// describing what went wrong.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the displayed-set invariants.
    ///
    /// Includes:
    /// - [`MessagesDeduplicated`]: no id shown twice
    /// - [`MessagesOrdered`]: shown in `(sent_at, id)` order
    /// - [`ConversationIsolation`]: only the open conversation's messages
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(MessagesDeduplicated);
        registry.add(MessagesOrdered);
        registry.add(ConversationIsolation);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    ///
    /// Use this in tests where you want immediate failure with context.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use courier_core::ConversationHandle;

    use super::*;
    use crate::fixtures::message;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&SystemSnapshot::empty()).is_ok());
    }

    #[test]
    fn reports_every_violation() {
        let handle = ConversationHandle::new(42, 1, 2);
        let view = ViewSnapshot::new(handle, vec![message(2, 7, 2, 1, 20), message(2, 7, 2, 1, 10)]);

        let violations = InvariantRegistry::standard()
            .check_all(&SystemSnapshot::single(view))
            .unwrap_err();

        let names: Vec<_> = violations.iter().map(|v| v.invariant).collect();
        assert_eq!(names, vec!["messages_deduplicated", "messages_ordered", "conversation_isolation"]);
    }

    #[test]
    #[should_panic(expected = "invariant violation after push")]
    fn assert_all_panics_with_context() {
        let handle = ConversationHandle::new(42, 1, 2);
        let view = ViewSnapshot::new(handle, vec![message(1, 42, 2, 1, 0), message(1, 42, 2, 1, 0)]);
        InvariantRegistry::standard().assert_all(&SystemSnapshot::single(view), "after push");
    }
}
