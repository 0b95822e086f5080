//! Test harness for the courier chat core.
//!
//! In-memory implementations of the two collaborator traits, so that the
//! real [`courier_client::ConnectionService`] and [`courier_client::ChatView`]
//! can run end to end under tokio's paused clock.
//!
//! # Fakes
//!
//! - [`FakeTransport`]: scripted push transport. Counts connect attempts,
//!   records invocations and injects server events.
//! - [`FakeApi`]: in-memory REST backend holding one message list per
//!   conversation.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks rendered view state against the
//! properties that must hold after every merge. Use
//! [`InvariantRegistry::standard()`] for the displayed-set invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_api;
pub mod fake_transport;
pub mod fixtures;
pub mod invariants;

pub use fake_api::FakeApi;
pub use fake_transport::FakeTransport;
pub use fixtures::{message, wait_for_snapshot};
pub use invariants::{
    ConversationIsolation, Invariant, InvariantRegistry, InvariantResult, MessagesDeduplicated,
    MessagesOrdered, SystemSnapshot, ViewSnapshot, Violation,
};
