use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Gender, Location, LookingFor, MessageKind, Photo, Preferences, Settings, SwipeAction,
};

// -- JWT Claims --

/// JWT claims shared between ember-api (REST middleware) and ember-gateway
/// (WebSocket Identify). Canonical definition lives here to avoid drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub telegram_id: i64,
    pub exp: usize,
}

// -- Auth --

/// Login/registration in one step. `init_data` is the raw string Telegram
/// hands the Mini App; the remaining fields are only consulted when the
/// telegram id has never been seen before.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TelegramAuthRequest {
    pub init_data: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub looking_for: Option<LookingFor>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub interests: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: OwnProfile,
    pub token: String,
}

// -- Profiles --

/// The caller's own profile: everything they are allowed to edit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnProfile {
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

/// What other users get to see: candidate cards, match lists, conversation
/// headers. No preferences, no settings, no telegram id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: Option<String>,
    pub age: Option<u8>,
    pub gender: Gender,
    pub bio: Option<String>,
    pub photos: Vec<Photo>,
    pub interests: Vec<String>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub interests: Option<Vec<String>>,
    #[serde(default)]
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddPhotoRequest {
    pub url: String,
    #[serde(default)]
    pub is_main: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub notifications: Option<crate::models::NotificationSettings>,
    #[serde(default)]
    pub privacy: Option<crate::models::PrivacySettings>,
}

// -- Candidates --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatesResponse {
    pub candidates: Vec<PublicProfile>,
    pub has_more: bool,
}

// -- Swipes & matches --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SwipeRequest {
    pub target_user_id: Uuid,
    pub action: SwipeAction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeResponse {
    pub is_match: bool,
    pub action: SwipeAction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub user_id: Uuid,
    pub user: PublicProfile,
    pub matched_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchesResponse {
    pub matches: Vec<MatchSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetailResponse {
    #[serde(rename = "match")]
    pub detail: MatchSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeHistoryEntry {
    pub target: PublicProfile,
    pub action: SwipeAction,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeHistoryResponse {
    pub swipes: Vec<SwipeHistoryEntry>,
    pub has_more: bool,
}

/// One side of a like: who liked, when, and with which action.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeEntry {
    pub user: PublicProfile,
    pub action: SwipeAction,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikesResponse {
    pub likes: Vec<LikeEntry>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStats {
    pub total_matches: u64,
    pub total_likes: u64,
    pub total_passes: u64,
    pub total_superlikes: u64,
    pub received_likes: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatsResponse {
    pub stats: MatchStats,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub reply_to: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub messages: Vec<MessageResponse>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub user_id: Uuid,
    pub user: PublicProfile,
    pub last_message: Option<LastMessage>,
    pub unread_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}
