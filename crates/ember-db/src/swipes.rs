use std::cmp::Reverse;

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use ember_types::api::MatchStats;
use ember_types::models::SwipeAction;

use crate::models::{
    MESSAGE_COLUMNS, MatchEntry, SwipeWithProfile, USER_COLUMNS, aliased, message_from_row,
    swipe_action_col, ts_col, user_from_row,
};
use crate::users::query_user;
use crate::{Database, Result, StoreError, now_rfc3339};

/// Outcome of a recorded swipe. `is_match` is true when this swipe completed
/// a mutual like.
#[derive(Debug, Clone, Copy)]
pub struct SwipeOutcome {
    pub is_match: bool,
}

impl Database {
    /// Append a swipe to the ledger. A pair can be swiped exactly once; the
    /// UNIQUE(actor_id, target_id) index turns a concurrent duplicate into a
    /// constraint failure here rather than a silent overwrite.
    pub fn record_swipe(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        action: SwipeAction,
    ) -> Result<SwipeOutcome> {
        if actor_id == target_id {
            return Err(StoreError::SelfSwipe);
        }

        self.with_conn(|conn| {
            let target_active: Option<bool> = conn
                .query_row(
                    "SELECT is_active FROM users WHERE id = ?1",
                    [target_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match target_active {
                None => return Err(StoreError::TargetNotFound),
                Some(false) => return Err(StoreError::TargetInactive),
                Some(true) => {}
            }

            let inserted = conn.execute(
                "INSERT INTO swipes (id, actor_id, target_id, action, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    actor_id.to_string(),
                    target_id.to_string(),
                    action.as_str(),
                    now_rfc3339(),
                ],
            );
            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    return Err(StoreError::DuplicateSwipe);
                }
                return Err(e.into());
            }

            // Fresh read against the ledger after the insert: when both
            // users like each other concurrently, whichever write lands
            // second observes the other's committed row.
            let is_match = action.is_positive() && query_mutual(conn, actor_id, target_id)?;
            Ok(SwipeOutcome { is_match })
        })
    }

    /// Both directional rows, if present. Idempotent.
    pub fn delete_swipe_pair(&self, a: Uuid, b: Uuid) -> Result<usize> {
        self.with_conn(|conn| delete_pair(conn, a, b))
    }

    /// The match detector: true iff both directional swipes exist and both
    /// are like or superlike. Always a fresh read; never cached across calls
    /// so an unmatch revokes messaging rights immediately.
    pub fn is_mutual_match(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| query_mutual(conn, a, b))
    }

    /// All mutual matches for a user, most recently active first: ordered by
    /// the latest message when the conversation has one, else by match time.
    pub fn list_matches(&self, user_id: Uuid) -> Result<Vec<MatchEntry>> {
        self.with_conn(|conn| {
            let user_cols = aliased(USER_COLUMNS, "u");
            let mut stmt = conn.prepare(&format!(
                "SELECT {user_cols}, s.created_at, r.created_at \
                 FROM swipes s \
                 JOIN swipes r ON r.actor_id = s.target_id AND r.target_id = s.actor_id \
                 JOIN users u ON u.id = s.target_id \
                 WHERE s.actor_id = ?1 \
                   AND s.action IN ('like', 'superlike') \
                   AND r.action IN ('like', 'superlike')"
            ))?;

            let mut entries: Vec<MatchEntry> = stmt
                .query_map([user_id.to_string()], |row| {
                    let user = user_from_row(row)?;
                    let ours = ts_col(row, 18)?;
                    let theirs = ts_col(row, 19)?;
                    Ok(MatchEntry {
                        user,
                        matched_at: ours.max(theirs),
                        last_message: None,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;

            let latest = crate::messages::latest_per_counterpart(conn, user_id)?;
            for entry in &mut entries {
                entry.last_message = latest.get(&entry.user.id).cloned();
            }

            entries.sort_by_key(|e| {
                Reverse(
                    e.last_message
                        .as_ref()
                        .map(|m| m.created_at)
                        .unwrap_or(e.matched_at),
                )
            });
            Ok(entries)
        })
    }

    pub fn get_match(&self, user_id: Uuid, other_id: Uuid) -> Result<MatchEntry> {
        self.with_conn(|conn| {
            if !query_mutual(conn, user_id, other_id)? {
                return Err(StoreError::MatchNotFound);
            }
            let user = query_user(conn, other_id)?.ok_or(StoreError::MatchNotFound)?;

            let matched_at = conn.query_row(
                "SELECT MAX(created_at) FROM swipes \
                 WHERE (actor_id = ?1 AND target_id = ?2) \
                    OR (actor_id = ?2 AND target_id = ?1)",
                params![user_id.to_string(), other_id.to_string()],
                |row| ts_col(row, 0),
            )?;

            let last_message = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE ((sender_id = ?1 AND receiver_id = ?2) \
                         OR (sender_id = ?2 AND receiver_id = ?1)) \
                       AND is_deleted = 0 \
                     ORDER BY created_at DESC, rowid DESC \
                     LIMIT 1"
                ))?
                .query_row(params![user_id.to_string(), other_id.to_string()], |row| {
                    message_from_row(row, 0)
                })
                .optional()?;

            Ok(MatchEntry {
                user,
                matched_at,
                last_message,
            })
        })
    }

    /// Every decision the user has made, newest first.
    pub fn swipe_history(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SwipeWithProfile>, bool)> {
        self.swipes_with_profile(
            "SELECT {users}, s.action, s.created_at \
             FROM swipes s JOIN users u ON u.id = s.target_id \
             WHERE s.actor_id = ?1 \
             ORDER BY s.created_at DESC, s.rowid DESC \
             LIMIT ?2 OFFSET ?3",
            user_id,
            limit,
            offset,
        )
    }

    /// Who liked me, newest first.
    pub fn likes_received(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SwipeWithProfile>, bool)> {
        self.swipes_with_profile(
            "SELECT {users}, s.action, s.created_at \
             FROM swipes s JOIN users u ON u.id = s.actor_id \
             WHERE s.target_id = ?1 AND s.action IN ('like', 'superlike') \
             ORDER BY s.created_at DESC, s.rowid DESC \
             LIMIT ?2 OFFSET ?3",
            user_id,
            limit,
            offset,
        )
    }

    /// Who I liked, newest first.
    pub fn likes_sent(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SwipeWithProfile>, bool)> {
        self.swipes_with_profile(
            "SELECT {users}, s.action, s.created_at \
             FROM swipes s JOIN users u ON u.id = s.target_id \
             WHERE s.actor_id = ?1 AND s.action IN ('like', 'superlike') \
             ORDER BY s.created_at DESC, s.rowid DESC \
             LIMIT ?2 OFFSET ?3",
            user_id,
            limit,
            offset,
        )
    }

    fn swipes_with_profile(
        &self,
        sql_template: &str,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SwipeWithProfile>, bool)> {
        self.with_conn(|conn| {
            let sql = sql_template.replace("{users}", &aliased(USER_COLUMNS, "u"));
            let mut stmt = conn.prepare(&sql)?;

            let rows: Vec<SwipeWithProfile> = stmt
                .query_map(params![user_id.to_string(), limit, offset], |row| {
                    Ok(SwipeWithProfile {
                        user: user_from_row(row)?,
                        action: swipe_action_col(row, 18)?,
                        created_at: ts_col(row, 19)?,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;

            let has_more = rows.len() == limit as usize && limit > 0;
            Ok((rows, has_more))
        })
    }

    pub fn match_stats(&self, user_id: Uuid) -> Result<MatchStats> {
        self.with_conn(|conn| {
            let uid = user_id.to_string();
            let total_matches: i64 = conn.query_row(
                "SELECT COUNT(*) FROM swipes s \
                 JOIN swipes r ON r.actor_id = s.target_id AND r.target_id = s.actor_id \
                 WHERE s.actor_id = ?1 \
                   AND s.action IN ('like', 'superlike') \
                   AND r.action IN ('like', 'superlike')",
                [&uid],
                |row| row.get(0),
            )?;

            let count_by_action = |action: &str| -> Result<i64> {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM swipes WHERE actor_id = ?1 AND action = ?2",
                    params![uid, action],
                    |row| row.get(0),
                )?)
            };

            let received_likes: i64 = conn.query_row(
                "SELECT COUNT(*) FROM swipes \
                 WHERE target_id = ?1 AND action IN ('like', 'superlike')",
                [&uid],
                |row| row.get(0),
            )?;

            Ok(MatchStats {
                total_matches: total_matches as u64,
                total_likes: count_by_action("like")? as u64,
                total_passes: count_by_action("pass")? as u64,
                total_superlikes: count_by_action("superlike")? as u64,
                received_likes: received_likes as u64,
            })
        })
    }
}

pub(crate) fn query_mutual(conn: &Connection, a: Uuid, b: Uuid) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM swipes \
         WHERE ((actor_id = ?1 AND target_id = ?2) OR (actor_id = ?2 AND target_id = ?1)) \
           AND action IN ('like', 'superlike')",
        params![a.to_string(), b.to_string()],
        |row| row.get(0),
    )?;
    Ok(count == 2)
}

pub(crate) fn delete_pair(conn: &Connection, a: Uuid, b: Uuid) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM swipes \
         WHERE (actor_id = ?1 AND target_id = ?2) OR (actor_id = ?2 AND target_id = ?1)",
        params![a.to_string(), b.to_string()],
    )?;
    Ok(deleted)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _)
        if err.code == rusqlite::ErrorCode::ConstraintViolation)
}
