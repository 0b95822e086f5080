//! Line-oriented transcript of a chat view.

use std::{collections::HashSet, io::Write};

use courier_client::ChatSnapshot;
use courier_core::{ConnectionState, LoadState, MessageId, SendError, UserId};

/// Prints what changed between successive snapshots.
///
/// Messages are printed once, when first displayed. Status lines appear only
/// on transitions.
pub struct Transcript {
    local_user: UserId,
    shown: HashSet<MessageId>,
    connection: Option<ConnectionState>,
    load_state: Option<LoadState>,
    remote_typing: bool,
    remote_online: Option<bool>,
    send_error: Option<SendError>,
}

impl Transcript {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            shown: HashSet::new(),
            connection: None,
            load_state: None,
            remote_typing: false,
            remote_online: None,
            send_error: None,
        }
    }

    pub fn render<W: Write>(&mut self, snapshot: &ChatSnapshot, out: &mut W) -> std::io::Result<()> {
        if self.connection != Some(snapshot.connection) {
            self.connection = Some(snapshot.connection);
            if snapshot.connection != ConnectionState::Connected {
                writeln!(out, "-- {} --", connection_label(snapshot.connection))?;
            }
        }

        if self.load_state != Some(snapshot.load_state) {
            self.load_state = Some(snapshot.load_state);
            match snapshot.load_state {
                LoadState::Loading => writeln!(out, "-- loading conversation --")?,
                LoadState::Failed => writeln!(out, "-- could not load conversation --")?,
                LoadState::Idle | LoadState::Loaded => {},
            }
        }

        for message in &snapshot.messages {
            if !self.shown.insert(message.id) {
                continue;
            }
            let who = if message.sender_id == self.local_user { "you" } else { "them" };
            writeln!(out, "[{}] {who}: {}", message.sent_at.format("%H:%M"), message.content)?;
        }

        if snapshot.remote_online != self.remote_online {
            self.remote_online = snapshot.remote_online;
            match snapshot.remote_online {
                Some(true) => writeln!(out, "-- peer online --")?,
                Some(false) => writeln!(out, "-- peer offline --")?,
                None => {},
            }
        }

        if snapshot.remote_typing && !self.remote_typing {
            writeln!(out, "-- peer is typing --")?;
        }
        self.remote_typing = snapshot.remote_typing;

        if snapshot.send_error != self.send_error {
            if let Some(error) = &snapshot.send_error {
                writeln!(out, "-- not sent ({error}), press enter to retry --")?;
            }
            self.send_error.clone_from(&snapshot.send_error);
        }

        out.flush()
    }
}

fn connection_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Reconnecting => "reconnecting",
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{ConversationHandle, Message};

    use super::*;

    fn message(id: i64, sender_id: UserId) -> Message {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "conversationId": 42,
            "senderId": sender_id,
            "receiverId": 3 - sender_id,
            "content": format!("m{id}"),
            "sentAt": "2026-01-01T10:15:00Z",
        }))
        .unwrap()
    }

    fn snapshot(messages: Vec<Message>) -> ChatSnapshot {
        ChatSnapshot {
            conversation: ConversationHandle::new(42, 1, 2),
            messages,
            load_state: LoadState::Loaded,
            connection: ConnectionState::Connected,
            joined: true,
            remote_typing: false,
            remote_online: None,
            draft: String::new(),
            sending: false,
            send_error: None,
        }
    }

    fn render(transcript: &mut Transcript, snapshot: &ChatSnapshot) -> String {
        let mut out = Vec::new();
        transcript.render(snapshot, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn prints_each_message_once() {
        let mut transcript = Transcript::new(1);

        let first = render(&mut transcript, &snapshot(vec![message(1, 2)]));
        assert_eq!(first, "[10:15] them: m1\n");

        let second = render(&mut transcript, &snapshot(vec![message(1, 2), message(2, 1)]));
        assert_eq!(second, "[10:15] you: m2\n");
    }

    #[test]
    fn prints_status_transitions_only() {
        let mut transcript = Transcript::new(1);
        let mut s = snapshot(vec![]);
        s.connection = ConnectionState::Reconnecting;

        assert_eq!(render(&mut transcript, &s), "-- reconnecting --\n");
        assert_eq!(render(&mut transcript, &s), "");

        s.send_error = Some(SendError::Rejected { reason: "offline".into() });
        assert!(render(&mut transcript, &s).starts_with("-- not sent"));
        assert_eq!(render(&mut transcript, &s), "");
    }
}
