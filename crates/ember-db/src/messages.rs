use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use ember_types::models::MessageKind;

use crate::models::{
    ConversationEntry, MESSAGE_COLUMNS, MessageRow, USER_COLUMNS, message_from_row, user_from_row,
};
use crate::swipes::{delete_pair, query_mutual};
use crate::{Database, Result, StoreError, now_rfc3339};

pub const MAX_CONTENT_LEN: usize = 1000;

impl Database {
    /// Append a message. The conversation gate runs first: without a live
    /// mutual match the send is refused, and the check is a fresh read so an
    /// unmatch takes effect for the very next call.
    pub fn send_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
        kind: MessageKind,
        media_url: Option<&str>,
        reply_to: Option<Uuid>,
    ) -> Result<MessageRow> {
        if sender_id == receiver_id {
            return Err(StoreError::SelfMessage);
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(StoreError::ContentTooLong);
        }

        self.with_conn(|conn| {
            ensure_matched(conn, sender_id, receiver_id)?;

            if let Some(reply_id) = reply_to {
                check_reply_target(conn, reply_id, sender_id, receiver_id)?;
            }

            let id = Uuid::new_v4();
            let now = now_rfc3339();
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, kind, media_url, \
                 reply_to, is_read, read_at, is_deleted, deleted_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, 0, NULL, ?8)",
                params![
                    id.to_string(),
                    sender_id.to_string(),
                    receiver_id.to_string(),
                    content,
                    kind.as_str(),
                    media_url,
                    reply_to.map(|r| r.to_string()),
                    now,
                ],
            )?;

            conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
            ))?
            .query_row([id.to_string()], |row| message_from_row(row, 0))
            .map_err(Into::into)
        })
    }

    /// The pair's conversation: queried newest-first for pagination, returned
    /// oldest-first for display. Fetching does NOT mark anything read;
    /// `mark_conversation_read` is the explicit path for that.
    pub fn get_conversation(
        &self,
        user_id: Uuid,
        other_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<MessageRow>, bool)> {
        self.with_conn(|conn| {
            ensure_matched(conn, user_id, other_id)?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE ((sender_id = ?1 AND receiver_id = ?2) \
                     OR (sender_id = ?2 AND receiver_id = ?1)) \
                   AND is_deleted = 0 \
                 ORDER BY created_at DESC, rowid DESC \
                 LIMIT ?3 OFFSET ?4"
            ))?;

            let mut rows: Vec<MessageRow> = stmt
                .query_map(
                    params![user_id.to_string(), other_id.to_string(), limit, offset],
                    |row| message_from_row(row, 0),
                )?
                .collect::<std::result::Result<_, _>>()?;

            let has_more = limit > 0 && rows.len() == limit as usize;
            rows.reverse();
            Ok((rows, has_more))
        })
    }

    /// Marks every unread message the counterpart sent to `reader_id` as
    /// read. Idempotent: a second call finds nothing left to update.
    pub fn mark_conversation_read(&self, reader_id: Uuid, other_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            ensure_matched(conn, reader_id, other_id)?;

            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = ?3 \
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
                params![reader_id.to_string(), other_id.to_string(), now_rfc3339()],
            )?;
            Ok(changed)
        })
    }

    /// Inbox view: one entry per counterpart with the latest message and the
    /// unread count, newest activity first. Derived entirely from the message
    /// log; unmatched pairs drop out because their history is soft-deleted.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationEntry>> {
        self.with_conn(|conn| {
            let latest = latest_per_counterpart(conn, user_id)?;
            if latest.is_empty() {
                return Ok(vec![]);
            }
            let unread = unread_by_counterpart(conn, user_id)?;
            let users = query_users_by_ids(conn, latest.keys().copied())?;

            let mut entries: Vec<ConversationEntry> = latest
                .into_iter()
                .filter_map(|(other_id, last_message)| {
                    users.get(&other_id).map(|user| ConversationEntry {
                        user: user.clone(),
                        unread_count: unread.get(&other_id).copied().unwrap_or(0),
                        last_message,
                    })
                })
                .collect();

            entries.sort_by_key(|e| std::cmp::Reverse(e.last_message.created_at));
            Ok(entries)
        })
    }

    /// Total unread messages across all conversations, for the badge.
    pub fn unread_total(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages \
                 WHERE receiver_id = ?1 AND is_read = 0 AND is_deleted = 0",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Sender-only soft delete. The row stays in place with `is_deleted` set.
    pub fn soft_delete_message(&self, requester_id: Uuid, message_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            let sender: Option<String> = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1",
                    [message_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            match sender {
                None => return Err(StoreError::MessageNotFound),
                Some(s) if s != requester_id.to_string() => {
                    return Err(StoreError::NotMessageOwner);
                }
                Some(_) => {}
            }

            conn.execute(
                "UPDATE messages SET is_deleted = 1, deleted_at = ?2 \
                 WHERE id = ?1 AND is_deleted = 0",
                params![message_id.to_string(), now_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Sever a match: retract both swipe rows and soft-delete the pair's
    /// message history in one transaction. Idempotent; the ledger deletion
    /// comes first inside the transaction so no window exists where messages
    /// could still be sent into a purged conversation.
    pub fn unmatch(&self, a: Uuid, b: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let swipes_removed = delete_pair(&tx, a, b)?;
            let messages_purged = tx.execute(
                "UPDATE messages SET is_deleted = 1, deleted_at = ?3 \
                 WHERE ((sender_id = ?1 AND receiver_id = ?2) \
                     OR (sender_id = ?2 AND receiver_id = ?1)) \
                   AND is_deleted = 0",
                params![a.to_string(), b.to_string(), now_rfc3339()],
            )?;

            tx.commit()?;
            debug!(
                "unmatch {a} / {b}: removed {swipes_removed} swipes, purged {messages_purged} messages"
            );
            Ok(())
        })
    }
}

/// The conversation gate. Self-pairs can never be mutual (self-swipes are
/// rejected at the ledger), so they fall out as NotMatched here too.
pub(crate) fn ensure_matched(conn: &Connection, a: Uuid, b: Uuid) -> Result<()> {
    if query_mutual(conn, a, b)? {
        Ok(())
    } else {
        Err(StoreError::NotMatched)
    }
}

fn check_reply_target(
    conn: &Connection,
    reply_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
) -> Result<()> {
    let target: Option<(String, String, bool)> = conn
        .query_row(
            "SELECT sender_id, receiver_id, is_deleted FROM messages WHERE id = ?1",
            [reply_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((from, to, is_deleted)) = target else {
        return Err(StoreError::InvalidReplyTarget);
    };
    let pair_matches = (from == sender_id.to_string() && to == receiver_id.to_string())
        || (from == receiver_id.to_string() && to == sender_id.to_string());
    if is_deleted || !pair_matches {
        return Err(StoreError::InvalidReplyTarget);
    }
    Ok(())
}

/// Latest non-deleted message per counterpart, in one window-function query
/// rather than a per-conversation lookup.
pub(crate) fn latest_per_counterpart(
    conn: &Connection,
    user_id: Uuid,
) -> Result<HashMap<Uuid, MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM ( \
             SELECT m.*, ROW_NUMBER() OVER ( \
                 PARTITION BY CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END \
                 ORDER BY m.created_at DESC, m.rowid DESC) AS rn \
             FROM messages m \
             WHERE (m.sender_id = ?1 OR m.receiver_id = ?1) AND m.is_deleted = 0 \
         ) WHERE rn = 1"
    ))?;

    let rows: Vec<MessageRow> = stmt
        .query_map([user_id.to_string()], |row| message_from_row(row, 0))?
        .collect::<std::result::Result<_, _>>()?;

    let mut latest = HashMap::new();
    for row in rows {
        let other = if row.sender_id == user_id {
            row.receiver_id
        } else {
            row.sender_id
        };
        latest.insert(other, row);
    }
    Ok(latest)
}

fn unread_by_counterpart(conn: &Connection, user_id: Uuid) -> Result<HashMap<Uuid, u64>> {
    let mut stmt = conn.prepare(
        "SELECT sender_id, COUNT(*) FROM messages \
         WHERE receiver_id = ?1 AND is_read = 0 AND is_deleted = 0 \
         GROUP BY sender_id",
    )?;

    let rows: Vec<(String, i64)> = stmt
        .query_map([user_id.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<std::result::Result<_, _>>()?;

    let mut unread = HashMap::new();
    for (sender, count) in rows {
        if let Ok(id) = sender.parse::<Uuid>() {
            unread.insert(id, count as u64);
        }
    }
    Ok(unread)
}

/// Batch-fetch users by id (avoids a per-conversation query).
fn query_users_by_ids(
    conn: &Connection,
    ids: impl Iterator<Item = Uuid>,
) -> Result<HashMap<Uuid, crate::models::UserRow>> {
    let ids: Vec<String> = ids.map(|id| id.to_string()).collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows: Vec<crate::models::UserRow> = stmt
        .query_map(params.as_slice(), user_from_row)?
        .collect::<std::result::Result<_, _>>()?;

    Ok(rows.into_iter().map(|u| (u.id, u)).collect())
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;
    use crate::test_support::complete_user;
    use ember_types::models::SwipeAction;

    fn matched_pair(db: &Database) -> (Uuid, Uuid) {
        let a = complete_user(db, 1, "Ana");
        let b = complete_user(db, 2, "Ben");
        db.record_swipe(a, b, SwipeAction::Like).unwrap();
        db.record_swipe(b, a, SwipeAction::Like).unwrap();
        (a, b)
    }

    #[test]
    fn sending_requires_a_mutual_match() {
        let db = Database::open_in_memory().unwrap();
        let a = complete_user(&db, 1, "Ana");
        let b = complete_user(&db, 2, "Ben");

        assert!(matches!(
            db.send_message(a, b, "hi", MessageKind::Text, None, None),
            Err(StoreError::NotMatched)
        ));

        db.record_swipe(a, b, SwipeAction::Like).unwrap();
        assert!(matches!(
            db.send_message(a, b, "hi", MessageKind::Text, None, None),
            Err(StoreError::NotMatched)
        ), "a one-sided like does not open the conversation");

        db.record_swipe(b, a, SwipeAction::Like).unwrap();
        db.send_message(a, b, "hi", MessageKind::Text, None, None).unwrap();
    }

    #[test]
    fn self_messages_are_always_denied() {
        let db = Database::open_in_memory().unwrap();
        let a = complete_user(&db, 1, "Ana");
        assert!(matches!(
            db.send_message(a, a, "hi me", MessageKind::Text, None, None),
            Err(StoreError::SelfMessage)
        ));
    }

    #[test]
    fn content_bounds_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);

        assert!(matches!(
            db.send_message(a, b, "   ", MessageKind::Text, None, None),
            Err(StoreError::EmptyContent)
        ));
        assert!(matches!(
            db.send_message(a, b, &"x".repeat(MAX_CONTENT_LEN + 1), MessageKind::Text, None, None),
            Err(StoreError::ContentTooLong)
        ));
        db.send_message(a, b, &"x".repeat(MAX_CONTENT_LEN), MessageKind::Text, None, None)
            .unwrap();
    }

    #[test]
    fn message_round_trip_preserves_fields() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);

        let first = db.send_message(a, b, "look", MessageKind::Text, None, None).unwrap();
        let reply = db
            .send_message(
                b,
                a,
                "a cat",
                MessageKind::Image,
                Some("/uploads/cat.gif"),
                Some(first.id),
            )
            .unwrap();

        let (messages, has_more) = db.get_conversation(a, b, 50, 0).unwrap();
        assert!(!has_more);
        assert_eq!(messages.len(), 2);
        // oldest first
        assert_eq!(messages[0].id, first.id);
        let got = &messages[1];
        assert_eq!(got.id, reply.id);
        assert_eq!(got.sender_id, b);
        assert_eq!(got.receiver_id, a);
        assert_eq!(got.content, "a cat");
        assert_eq!(got.kind, MessageKind::Image);
        assert_eq!(got.media_url.as_deref(), Some("/uploads/cat.gif"));
        assert_eq!(got.reply_to, Some(first.id));
        assert!(!got.is_read);
    }

    #[test]
    fn reply_target_must_be_live_and_in_pair() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);
        let c = complete_user(&db, 3, "Cleo");
        db.record_swipe(a, c, SwipeAction::Like).unwrap();
        db.record_swipe(c, a, SwipeAction::Like).unwrap();

        let other_pair = db.send_message(a, c, "hello c", MessageKind::Text, None, None).unwrap();
        assert!(matches!(
            db.send_message(a, b, "re", MessageKind::Text, None, Some(other_pair.id)),
            Err(StoreError::InvalidReplyTarget)
        ));
        assert!(matches!(
            db.send_message(a, b, "re", MessageKind::Text, None, Some(Uuid::new_v4())),
            Err(StoreError::InvalidReplyTarget)
        ));

        let deleted = db.send_message(a, b, "oops", MessageKind::Text, None, None).unwrap();
        db.soft_delete_message(a, deleted.id).unwrap();
        assert!(matches!(
            db.send_message(b, a, "re", MessageKind::Text, None, Some(deleted.id)),
            Err(StoreError::InvalidReplyTarget)
        ));
    }

    #[test]
    fn fetching_does_not_mark_read_marking_does() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);
        db.send_message(a, b, "one", MessageKind::Text, None, None).unwrap();
        db.send_message(a, b, "two", MessageKind::Text, None, None).unwrap();

        let (messages, _) = db.get_conversation(b, a, 50, 0).unwrap();
        assert!(messages.iter().all(|m| !m.is_read), "fetch alone leaves messages unread");

        assert_eq!(db.mark_conversation_read(b, a).unwrap(), 2);
        let (messages, _) = db.get_conversation(b, a, 50, 0).unwrap();
        assert!(messages.iter().all(|m| m.is_read && m.read_at.is_some()));

        // idempotent: nothing left to update, no error
        assert_eq!(db.mark_conversation_read(b, a).unwrap(), 0);
    }

    #[test]
    fn mark_read_only_touches_messages_addressed_to_reader() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);
        db.send_message(a, b, "from a", MessageKind::Text, None, None).unwrap();
        db.send_message(b, a, "from b", MessageKind::Text, None, None).unwrap();

        db.mark_conversation_read(b, a).unwrap();

        let (messages, _) = db.get_conversation(a, b, 50, 0).unwrap();
        let from_a = messages.iter().find(|m| m.sender_id == a).unwrap();
        let from_b = messages.iter().find(|m| m.sender_id == b).unwrap();
        assert!(from_a.is_read, "b read a's message");
        assert!(!from_b.is_read, "b's own message stays unread for a");
    }

    #[test]
    fn conversation_pagination_windows() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);
        for n in 0..5 {
            db.send_message(a, b, &format!("m{n}"), MessageKind::Text, None, None)
                .unwrap();
        }

        // newest two
        let (page, has_more) = db.get_conversation(a, b, 2, 0).unwrap();
        assert!(has_more);
        assert_eq!(
            page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m3", "m4"]
        );

        let (page, _) = db.get_conversation(a, b, 2, 2).unwrap();
        assert_eq!(
            page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m2"]
        );
    }

    #[test]
    fn inbox_groups_by_counterpart_with_unread_counts() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);
        let c = complete_user(&db, 3, "Cleo");
        db.record_swipe(a, c, SwipeAction::Like).unwrap();
        db.record_swipe(c, a, SwipeAction::Like).unwrap();

        db.send_message(b, a, "hi from b", MessageKind::Text, None, None).unwrap();
        db.send_message(b, a, "again", MessageKind::Text, None, None).unwrap();
        sleep(Duration::from_millis(5));
        db.send_message(c, a, "hi from c", MessageKind::Text, None, None).unwrap();

        let conversations = db.list_conversations(a).unwrap();
        assert_eq!(conversations.len(), 2);
        // c's message is the most recent activity
        assert_eq!(conversations[0].user.id, c);
        assert_eq!(conversations[0].unread_count, 1);
        assert_eq!(conversations[1].user.id, b);
        assert_eq!(conversations[1].unread_count, 2);
        assert_eq!(conversations[1].last_message.content, "again");

        assert_eq!(db.unread_total(a).unwrap(), 3);

        db.mark_conversation_read(a, b).unwrap();
        assert_eq!(db.unread_total(a).unwrap(), 1);
    }

    #[test]
    fn soft_delete_is_sender_only_and_hides_the_message() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);
        let msg = db.send_message(a, b, "typo", MessageKind::Text, None, None).unwrap();

        assert!(matches!(
            db.soft_delete_message(b, msg.id),
            Err(StoreError::NotMessageOwner)
        ));
        assert!(matches!(
            db.soft_delete_message(a, Uuid::new_v4()),
            Err(StoreError::MessageNotFound)
        ));

        db.soft_delete_message(a, msg.id).unwrap();
        let (messages, _) = db.get_conversation(a, b, 50, 0).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn unmatch_revokes_messaging_and_purges_history() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = matched_pair(&db);
        db.send_message(a, b, "hello", MessageKind::Text, None, None).unwrap();

        db.unmatch(a, b).unwrap();

        assert!(!db.is_mutual_match(a, b).unwrap());
        assert!(matches!(
            db.send_message(a, b, "hello again", MessageKind::Text, None, None),
            Err(StoreError::NotMatched)
        ));
        assert!(matches!(
            db.get_conversation(a, b, 50, 0),
            Err(StoreError::NotMatched)
        ));
        assert!(db.list_conversations(a).unwrap().is_empty());
        assert!(db.list_matches(a).unwrap().is_empty());

        // second unmatch is a no-op
        db.unmatch(a, b).unwrap();
    }
}
