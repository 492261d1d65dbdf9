//! Row types mapping directly to SQLite rows, parsed into domain values at
//! the storage boundary. Distinct from the ember-types API models; explicit
//! conversions keep the wire surface decoupled from the schema.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use ember_types::api::{LastMessage, MessageResponse, OwnProfile, PublicProfile};
use ember_types::models::{
    self, Gender, Location, LookingFor, MessageKind, Photo, Preferences, Settings, SwipeAction,
};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub age: Option<u8>,
    pub gender: Gender,
    pub looking_for: LookingFor,
    pub bio: Option<String>,
    pub photos: Vec<Photo>,
    pub interests: Vec<String>,
    pub location: Option<Location>,
    pub preferences: Preferences,
    pub settings: Settings,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn main_photo_url(&self) -> Option<&str> {
        self.photos
            .iter()
            .find(|p| p.is_main)
            .or_else(|| self.photos.first())
            .map(|p| p.url.as_str())
    }

    /// Candidate browsing requires age, bio and at least one photo on top of
    /// the always-present gender/looking_for.
    pub fn missing_profile_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.age.is_none() {
            missing.push("age");
        }
        if self.bio.as_deref().map_or(true, |b| b.trim().is_empty()) {
            missing.push("bio");
        }
        if self.photos.is_empty() {
            missing.push("photos");
        }
        missing
    }

    pub fn is_profile_complete(&self) -> bool {
        self.missing_profile_fields().is_empty()
    }

    pub fn into_own_profile(self) -> OwnProfile {
        OwnProfile {
            id: self.id,
            telegram_id: self.telegram_id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            age: self.age,
            gender: self.gender,
            looking_for: self.looking_for,
            bio: self.bio,
            photos: self.photos,
            interests: self.interests,
            location: self.location,
            preferences: self.preferences,
            settings: self.settings,
            is_active: self.is_active,
            is_verified: self.is_verified,
            last_seen: self.last_seen,
            created_at: self.created_at,
        }
    }

    pub fn to_public_profile(&self, now: DateTime<Utc>) -> PublicProfile {
        PublicProfile {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            age: self.age,
            gender: self.gender,
            bio: self.bio.clone(),
            photos: self.photos.clone(),
            interests: self.interests.clone(),
            last_seen: self.last_seen,
            is_online: models::is_online(self.last_seen, now),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwipeRow {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub target_id: Uuid,
    pub action: SwipeAction,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub reply_to: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_response(self) -> MessageResponse {
        MessageResponse {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            kind: self.kind,
            media_url: self.media_url,
            reply_to: self.reply_to,
            is_read: self.is_read,
            read_at: self.read_at,
            created_at: self.created_at,
        }
    }

    pub fn to_last_message(&self) -> LastMessage {
        LastMessage {
            content: self.content.clone(),
            kind: self.kind,
            created_at: self.created_at,
            is_read: self.is_read,
        }
    }
}

/// A swipe joined with the counterpart's profile, for history and like
/// listings.
#[derive(Debug)]
pub struct SwipeWithProfile {
    pub user: UserRow,
    pub action: SwipeAction,
    pub created_at: DateTime<Utc>,
}

/// A mutual match from one user's point of view.
#[derive(Debug)]
pub struct MatchEntry {
    pub user: UserRow,
    pub matched_at: DateTime<Utc>,
    pub last_message: Option<MessageRow>,
}

/// One conversation in a user's inbox.
#[derive(Debug)]
pub struct ConversationEntry {
    pub user: UserRow,
    pub last_message: MessageRow,
    pub unread_count: u64,
}

// -- column mapping helpers --

pub(crate) const USER_COLUMNS: &str = "id, telegram_id, username, first_name, last_name, age, \
     gender, looking_for, bio, photos, interests, location, preferences, settings, \
     is_active, is_verified, last_seen, created_at";

pub(crate) const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, kind, media_url, \
     reply_to, is_read, read_at, is_deleted, deleted_at, created_at";

/// Prefix every column with a table alias for JOIN queries.
pub(crate) fn aliased(columns: &str, alias: &str) -> String {
    columns
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conv_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conv_err(idx, e))
}

pub(crate) fn opt_uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| s.parse().map_err(|e| conv_err(idx, e))).transpose()
}

pub(crate) fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(&s, idx)
}

pub(crate) fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(&s, idx)).transpose()
}

fn parse_ts(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conv_err(idx, e))
}

pub(crate) fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conv_err(idx, e))
}

pub(crate) fn opt_json_col<T: DeserializeOwned>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| serde_json::from_str(&s).map_err(|e| conv_err(idx, e)))
        .transpose()
}

fn name_col<T>(
    row: &Row,
    idx: usize,
    parse: fn(&str) -> Option<T>,
    what: &'static str,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| conv_err(idx, std::io::Error::other(format!("unknown {what}: {s}"))))
}

/// Maps the 18 `USER_COLUMNS` starting at column 0.
pub(crate) fn user_from_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_col(row, 0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        age: row.get::<_, Option<i64>>(5)?.map(|a| a as u8),
        gender: name_col(row, 6, Gender::parse, "gender")?,
        looking_for: name_col(row, 7, LookingFor::parse, "looking_for")?,
        bio: row.get(8)?,
        photos: json_col(row, 9)?,
        interests: json_col(row, 10)?,
        location: opt_json_col(row, 11)?,
        preferences: json_col(row, 12)?,
        settings: json_col(row, 13)?,
        is_active: row.get(14)?,
        is_verified: row.get(15)?,
        last_seen: ts_col(row, 16)?,
        created_at: ts_col(row, 17)?,
    })
}

/// Maps the 12 `MESSAGE_COLUMNS` starting at `base`.
pub(crate) fn message_from_row(row: &Row, base: usize) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: uuid_col(row, base)?,
        sender_id: uuid_col(row, base + 1)?,
        receiver_id: uuid_col(row, base + 2)?,
        content: row.get(base + 3)?,
        kind: name_col(row, base + 4, MessageKind::parse, "message kind")?,
        media_url: row.get(base + 5)?,
        reply_to: opt_uuid_col(row, base + 6)?,
        is_read: row.get(base + 7)?,
        read_at: opt_ts_col(row, base + 8)?,
        is_deleted: row.get(base + 9)?,
        deleted_at: opt_ts_col(row, base + 10)?,
        created_at: ts_col(row, base + 11)?,
    })
}

pub(crate) fn swipe_action_col(row: &Row, idx: usize) -> rusqlite::Result<SwipeAction> {
    name_col(row, idx, SwipeAction::parse, "swipe action")
}
