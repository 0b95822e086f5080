//! Message builders and view helpers shared by scenario tests.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use courier_client::{ChatSnapshot, ChatView};
use courier_core::{ConversationId, Message, MessageId, UserId};

/// Upper bound on virtual time a scenario waits for a view to settle.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Fixed epoch all fixture timestamps are offset from.
const BASE_TIMESTAMP: i64 = 1_767_225_600;

/// Timestamp `secs` seconds after the fixture epoch.
pub fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(BASE_TIMESTAMP + secs)
}

/// Unread message sent `secs` seconds after the fixture epoch.
pub fn message(
    id: MessageId,
    conversation_id: ConversationId,
    sender_id: UserId,
    receiver_id: UserId,
    secs: i64,
) -> Message {
    Message {
        id,
        conversation_id: Some(conversation_id),
        sender_id,
        receiver_id,
        content: format!("message {id}"),
        sent_at: timestamp(secs),
        is_read: false,
    }
}

/// Wait until the view renders a snapshot matching `predicate`.
///
/// Returns `None` if the view stops or nothing matches within
/// [`SETTLE_TIMEOUT`] of virtual time.
pub async fn wait_for_snapshot<F>(view: &ChatView, mut predicate: F) -> Option<ChatSnapshot>
where
    F: FnMut(&ChatSnapshot) -> bool,
{
    let mut rx = view.watch();
    let waited = tokio::time::timeout(SETTLE_TIMEOUT, async {
        rx.wait_for(|snapshot| predicate(snapshot)).await.map(|snapshot| snapshot.clone())
    })
    .await;

    match waited {
        Ok(Ok(snapshot)) => Some(snapshot),
        Ok(Err(_)) => {
            tracing::debug!("chat view stopped while waiting");
            None
        },
        Err(_) => {
            tracing::debug!(timeout = ?SETTLE_TIMEOUT, "no matching snapshot");
            None
        },
    }
}
