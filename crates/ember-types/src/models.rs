use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A swipe decision is one-shot: once recorded for a (actor, target) pair it
/// can never be changed, only deleted by an unmatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAction {
    Like,
    Pass,
    Superlike,
}

impl SwipeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Pass => "pass",
            Self::Superlike => "superlike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "pass" => Some(Self::Pass),
            "superlike" => Some(Self::Superlike),
            _ => None,
        }
    }

    /// Pass never contributes to a match.
    pub fn is_positive(self) -> bool {
        matches!(self, Self::Like | Self::Superlike)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Sticker,
    Gif,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Sticker => "sticker",
            Self::Gif => "gif",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "sticker" => Some(Self::Sticker),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Who a user wants to be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookingFor {
    Male,
    Female,
    Both,
}

impl LookingFor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Profile photo metadata. The image bytes live wherever the upload service
/// put them; Ember only tracks the URL and which photo is the main one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: uuid::Uuid,
    pub url: String,
    #[serde(default)]
    pub is_main: bool,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeRange {
    pub min: u8,
    pub max: u8,
}

impl Default for AgeRange {
    fn default() -> Self {
        Self { min: 18, max: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub age_range: AgeRange,
    /// Kilometers.
    pub max_distance: u32,
    pub show_me: LookingFor,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            age_range: AgeRange::default(),
            max_distance: 50,
            show_me: LookingFor::Both,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub new_matches: bool,
    pub messages: bool,
    pub likes: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            new_matches: true,
            messages: true,
            likes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacySettings {
    pub show_age: bool,
    pub show_distance: bool,
    pub show_online_status: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            show_age: true,
            show_distance: true,
            show_online_status: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub notifications: NotificationSettings,
    pub privacy: PrivacySettings,
}

/// Presence window: a user counts as online if they were seen within the
/// last five minutes. Derived on demand, never persisted.
pub const ONLINE_WINDOW_MINUTES: i64 = 5;

pub fn is_online(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(last_seen) < Duration::minutes(ONLINE_WINDOW_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swipe_action_round_trips_through_names() {
        for action in [SwipeAction::Like, SwipeAction::Pass, SwipeAction::Superlike] {
            assert_eq!(SwipeAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(SwipeAction::parse("dislike"), None);
    }

    #[test]
    fn only_like_and_superlike_are_positive() {
        assert!(SwipeAction::Like.is_positive());
        assert!(SwipeAction::Superlike.is_positive());
        assert!(!SwipeAction::Pass.is_positive());
    }

    #[test]
    fn presence_window_boundary() {
        let now = Utc::now();
        assert!(is_online(now - Duration::minutes(4), now));
        assert!(!is_online(now - Duration::minutes(5), now));
        assert!(!is_online(now - Duration::hours(2), now));
    }
}
