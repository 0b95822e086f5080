//! Courier core
//!
//! Sans-IO state machines for real-time chat delivery. Every component takes
//! the current time as an argument, consumes events and returns actions, so
//! the same code runs under the tokio runtime and under deterministic tests.
//!
//! # Components
//!
//! - [`ConnectionManager`]: push connection lifecycle, backoff, heartbeat
//! - [`Membership`]: joins and leaves the open conversation's room
//! - [`Composer`]: dual-path send pipeline (push first, REST fallback)
//! - [`SyncEngine`]: merges pushes and REST snapshots into one ordered set
//! - [`TypingTracker`]: debounced local typing, self-expiring remote typing
//! - [`ChatSession`]: the above composed into one chat view

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod event;
pub mod membership;
pub mod message;
pub mod send;
pub mod session;
pub mod sync;
pub mod typing;

pub use config::{ChatConfig, Platform, PlatformCapabilities, ReconnectPolicy, TransportMode};
pub use connection::{ConnectionAction, ConnectionManager, ConnectionState};
pub use env::{Environment, TimePoint};
pub use error::{PayloadError, SendError};
pub use event::{ConnectionEvent, PushEvent};
pub use membership::{Membership, MembershipAction};
pub use message::{
    ConversationHandle, ConversationId, Message, MessageId, OutgoingMessage, UserId, WireMessage,
};
pub use send::{Composer, SendAction, SendRoute};
pub use session::{ChatAction, ChatEvent, ChatSession};
pub use sync::{FetchKind, FetchRequest, Incoming, LoadState, SyncAction, SyncEngine, merge};
pub use typing::{TypingAction, TypingState, TypingTracker};
