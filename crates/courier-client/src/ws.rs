//! WebSocket push transport.
//!
//! Speaks a JSON envelope over text frames. The client sends invocations
//! and the server answers each with a completion. Server-initiated events
//! carry a target name and positional arguments:
//!
//! ```text
//! → {"type":"invocation","invocationId":"7","target":"SendMessage","arguments":[42,"hi"]}
//! ← {"type":"completion","invocationId":"7"}
//! ← {"type":"event","target":"ReceiveMessage","arguments":[{...message...}]}
//! ← {"type":"close","error":"server restarting"}
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_core::{ConversationId, PushEvent, TransportMode};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message as WsMessage,
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
    },
};

use crate::{error::TransportError, transport::PushTransport};

/// Time to wait for a completion before an invocation fails.
pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered outbound frames.
const OUTGOING_CAPACITY: usize = 64;

const JOIN_CONVERSATION: &str = "JoinConversation";
const LEAVE_CONVERSATION: &str = "LeaveConversation";

type Completions = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

/// Wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Client to server call.
    #[serde(rename_all = "camelCase")]
    Invocation {
        /// Correlates the completion.
        invocation_id: String,
        /// Hub method.
        target: String,
        /// Positional arguments.
        arguments: Vec<Value>,
    },
    /// Server answer to an invocation.
    #[serde(rename_all = "camelCase")]
    Completion {
        /// Invocation being answered.
        invocation_id: String,
        /// Failure reason. Absent on success.
        #[serde(default)]
        error: Option<String>,
    },
    /// Server-initiated event.
    Event {
        /// Event name.
        target: String,
        /// Positional arguments.
        #[serde(default)]
        arguments: Vec<Value>,
    },
    /// Server is closing the connection.
    Close {
        /// Reason.
        #[serde(default)]
        error: Option<String>,
    },
}

/// Map a server event onto a [`PushEvent`]. `None` for unknown or
/// malformed events.
pub fn push_event(target: &str, arguments: &[Value]) -> Option<PushEvent> {
    match target {
        "ReceiveMessage" => arguments.first().cloned().map(PushEvent::Message),
        "UserTyping" => Some(PushEvent::Typing {
            user_id: arguments.first()?.as_i64()?,
            is_typing: arguments.get(1)?.as_bool()?,
            conversation_id: arguments.get(2).and_then(Value::as_i64),
        }),
        "UserPresence" => Some(PushEvent::Presence {
            user_id: arguments.first()?.as_i64()?,
            is_online: arguments.get(1)?.as_bool()?,
        }),
        _ => None,
    }
}

struct Socket {
    outgoing: mpsc::Sender<WsMessage>,
    completions: Completions,
    task: JoinHandle<()>,
}

/// [`PushTransport`] over a WebSocket.
pub struct WsTransport {
    url: String,
    auth: Option<(String, String)>,
    socket: Mutex<Option<Socket>>,
    next_invocation: AtomicU64,
}

impl WsTransport {
    /// Transport for the hub at `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), auth: None, socket: Mutex::new(None), next_invocation: AtomicU64::new(1) }
    }

    /// Attach `value` as the `header` on the upgrade request.
    #[must_use]
    pub fn with_auth(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth = Some((header.into(), value.into()));
        self
    }

    fn take_socket(&self) -> Option<Socket> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn start(
        &self,
        mode: TransportMode,
        events: mpsc::Sender<PushEvent>,
    ) -> Result<(), TransportError> {
        if mode == TransportMode::LongPolling {
            tracing::warn!("long polling requested, websocket transport connects anyway");
        }

        if let Some(previous) = self.take_socket() {
            tracing::debug!("restarting websocket transport");
            previous.task.abort();
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connection(format!("invalid url: {e}")))?;
        if let Some((header, value)) = &self.auth {
            let name = HeaderName::from_bytes(header.as_bytes())
                .map_err(|e| TransportError::Connection(format!("invalid auth header: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connection(format!("invalid auth value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        tracing::info!(url = %self.url, "websocket connected");

        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let completions = Completions::default();
        let task = tokio::spawn(run_socket(stream, outgoing_rx, events, Arc::clone(&completions)));

        let replaced = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Socket { outgoing, completions, task });
        if let Some(replaced) = replaced {
            replaced.task.abort();
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Some(socket) = self.take_socket() {
            // Dropping the sender lets the socket task close gracefully
            drop(socket.outgoing);
            tracing::debug!("websocket transport stopped");
        }
    }

    async fn join(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        self.invoke(JOIN_CONVERSATION, vec![json!(conversation_id)]).await
    }

    async fn leave(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        self.invoke(LEAVE_CONVERSATION, vec![json!(conversation_id)]).await
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        let (outgoing, completions) = {
            let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
            let socket = socket.as_ref().ok_or(TransportError::NotConnected)?;
            (socket.outgoing.clone(), Arc::clone(&socket.completions))
        };

        let invocation_id = self.next_invocation.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = serde_json::to_string(&Envelope::Invocation {
            invocation_id: invocation_id.clone(),
            target: method.to_owned(),
            arguments: args,
        })
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        completions.lock().unwrap_or_else(PoisonError::into_inner).insert(invocation_id.clone(), tx);

        if outgoing.send(WsMessage::Text(frame.into())).await.is_err() {
            completions.lock().unwrap_or_else(PoisonError::into_inner).remove(&invocation_id);
            return Err(TransportError::NotConnected);
        }

        match tokio::time::timeout(INVOCATION_TIMEOUT, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(TransportError::Invocation { method: method.to_owned(), reason }),
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                completions.lock().unwrap_or_else(PoisonError::into_inner).remove(&invocation_id);
                Err(TransportError::Invocation { method: method.to_owned(), reason: "timed out".into() })
            },
        }
    }
}

/// Pump frames between the socket and the channels until either side ends.
async fn run_socket(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing: mpsc::Receiver<WsMessage>,
    events: mpsc::Sender<PushEvent>,
    completions: Completions,
) {
    let (mut sink, mut incoming) = stream.split();

    let reason = loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        break Some(e.to_string());
                    }
                },
                None => {
                    // Stopped locally: no Closed event
                    if let Err(e) = sink.close().await {
                        tracing::debug!(error = %e, "websocket close failed");
                    }
                    completions.lock().unwrap_or_else(PoisonError::into_inner).clear();
                    return;
                },
            },
            frame = incoming.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(reason) = handle_text(text.as_str(), &events, &completions).await {
                        break reason;
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => break frame.map(|f| f.reason.as_str().to_owned()),
                Some(Ok(_)) => {},
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            },
        }
    };

    tracing::warn!(reason = reason.as_deref().unwrap_or("unknown"), "websocket closed");
    completions.lock().unwrap_or_else(PoisonError::into_inner).clear();
    if events.send(PushEvent::Closed { reason }).await.is_err() {
        tracing::debug!("push event receiver gone");
    }
}

/// Handle one text frame. Returns `Some(reason)` if the server is closing.
async fn handle_text(
    text: &str,
    events: &mpsc::Sender<PushEvent>,
    completions: &Completions,
) -> Option<Option<String>> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(%error, "dropping undecodable frame");
            return None;
        },
    };

    match envelope {
        Envelope::Completion { invocation_id, error } => {
            let waiter = completions.lock().unwrap_or_else(PoisonError::into_inner).remove(&invocation_id);
            if let Some(waiter) = waiter {
                let _ = waiter.send(error.map_or(Ok(()), Err));
            }
        },
        Envelope::Event { target, arguments } => match push_event(&target, &arguments) {
            Some(event) => {
                if events.send(event).await.is_err() {
                    tracing::debug!("push event receiver gone");
                }
            },
            None => tracing::debug!(%target, "ignoring unknown event"),
        },
        Envelope::Close { error } => return Some(error),
        Envelope::Invocation { target, .. } => {
            tracing::debug!(%target, "ignoring server invocation");
        },
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_camel_case_tags() {
        let frame = serde_json::to_value(Envelope::Invocation {
            invocation_id: "1".into(),
            target: "Ping".into(),
            arguments: vec![],
        })
        .unwrap();

        assert_eq!(
            frame,
            json!({ "type": "invocation", "invocationId": "1", "target": "Ping", "arguments": [] })
        );
    }

    #[test]
    fn completion_without_error_decodes() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"completion","invocationId":"3"}"#).unwrap();
        assert_eq!(envelope, Envelope::Completion { invocation_id: "3".into(), error: None });
    }

    #[test]
    fn typing_event_maps_with_optional_conversation() {
        assert_eq!(
            push_event("UserTyping", &[json!(2), json!(true)]),
            Some(PushEvent::Typing { conversation_id: None, user_id: 2, is_typing: true })
        );
        assert_eq!(
            push_event("UserTyping", &[json!(2), json!(false), json!(42)]),
            Some(PushEvent::Typing { conversation_id: Some(42), user_id: 2, is_typing: false })
        );
    }

    #[test]
    fn malformed_events_are_ignored() {
        assert_eq!(push_event("UserPresence", &[json!("two")]), None);
        assert_eq!(push_event("ReceiveMessage", &[]), None);
        assert_eq!(push_event("Unknown", &[json!(1)]), None);
    }
}
