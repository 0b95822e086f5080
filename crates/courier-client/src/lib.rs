//! Courier client runtime
//!
//! Tokio runtime for the `courier-core` state machines. Executes their
//! actions against two collaborators, a REST backend ([`MessageApi`]) and a
//! push transport ([`PushTransport`]), and feeds the results back.
//!
//! # Components
//!
//! - [`ConnectionService`]: the single process-wide push connection
//! - [`ChatView`]: one open conversation, publishing [`ChatSnapshot`]s
//! - [`HostSignals`]: foreground/background and focus notifications
//! - [`SystemEnv`]: production [`courier_core::Environment`]
//!
//! # Features
//!
//! - `http`: [`HttpMessageApi`], a `reqwest` REST client
//! - `websocket`: [`WsTransport`], a `tokio-tungstenite` push transport

#![forbid(unsafe_code)]

mod api;
mod error;
mod host;
mod service;
mod system_env;
mod transport;
mod view;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "websocket")]
pub mod ws;

pub use api::MessageApi;
pub use error::{ApiError, TransportError};
pub use host::{HostSignals, Visibility};
#[cfg(feature = "http")]
pub use http::{DEFAULT_AUTH_HEADER, HttpMessageApi};
pub use service::ConnectionService;
pub use system_env::SystemEnv;
pub use transport::{PushTransport, methods};
pub use view::{ChatSnapshot, ChatView};
#[cfg(feature = "websocket")]
pub use ws::WsTransport;
