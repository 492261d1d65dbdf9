use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use ember_types::api::UpdateProfileRequest;
use ember_types::models::{
    Gender, Location, LookingFor, NotificationSettings, Photo, Preferences, PrivacySettings,
    Settings,
};

use crate::models::{USER_COLUMNS, UserRow, user_from_row};
use crate::{Database, Result, StoreError, now_rfc3339};

/// Everything needed to create a user on first Telegram login.
#[derive(Debug, Clone)]
pub struct NewTelegramUser {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub age: Option<u8>,
    pub gender: Gender,
    pub looking_for: LookingFor,
    pub bio: Option<String>,
    pub interests: Vec<String>,
}

impl Database {
    /// Login and registration in one step: a known telegram id refreshes
    /// `last_seen` and returns the stored profile; an unknown one creates a
    /// fresh row. Returns `(user, created)`.
    pub fn upsert_telegram_user(&self, new: &NewTelegramUser) -> Result<(UserRow, bool)> {
        self.with_conn_mut(|conn| {
            let existing = conn
                .prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"
                ))?
                .query_row([new.telegram_id], user_from_row)
                .optional()?;

            if let Some(user) = existing {
                conn.execute(
                    "UPDATE users SET last_seen = ?1 WHERE id = ?2",
                    params![now_rfc3339(), user.id.to_string()],
                )?;
                let user = query_user(conn, user.id)?.ok_or(StoreError::UserNotFound)?;
                return Ok((user, false));
            }

            let id = Uuid::new_v4();
            let now = now_rfc3339();
            let interests = serde_json::to_string(&new.interests)?;
            let preferences = serde_json::to_string(&Preferences::default())?;
            let settings = serde_json::to_string(&Settings::default())?;

            conn.execute(
                "INSERT INTO users (id, telegram_id, username, first_name, last_name, age, \
                 gender, looking_for, bio, photos, interests, location, preferences, settings, \
                 is_active, is_verified, last_seen, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '[]', ?10, NULL, ?11, ?12, 1, 1, ?13, ?13)",
                params![
                    id.to_string(),
                    new.telegram_id,
                    new.username,
                    new.first_name,
                    new.last_name,
                    new.age.map(i64::from),
                    new.gender.as_str(),
                    new.looking_for.as_str(),
                    new.bio,
                    interests,
                    preferences,
                    settings,
                    now,
                ],
            )?;

            let user = query_user(conn, id)?.ok_or(StoreError::UserNotFound)?;
            Ok((user, true))
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"
                ))?
                .query_row([telegram_id], user_from_row)
                .optional()?;
            Ok(row)
        })
    }

    pub fn require_user(&self, id: Uuid) -> Result<UserRow> {
        self.get_user(id)?.ok_or(StoreError::UserNotFound)
    }

    pub fn update_profile(&self, id: Uuid, req: &UpdateProfileRequest) -> Result<UserRow> {
        self.with_conn(|conn| {
            let mut user = query_user(conn, id)?.ok_or(StoreError::UserNotFound)?;

            if let Some(v) = &req.first_name {
                user.first_name = v.trim().to_string();
            }
            if let Some(v) = &req.last_name {
                user.last_name = Some(v.trim().to_string());
            }
            if let Some(v) = req.age {
                user.age = Some(v);
            }
            if let Some(v) = &req.bio {
                user.bio = Some(v.trim().to_string());
            }
            if let Some(v) = &req.interests {
                user.interests = v.clone();
            }
            if let Some(v) = &req.preferences {
                user.preferences = v.clone();
            }

            conn.execute(
                "UPDATE users SET first_name = ?1, last_name = ?2, age = ?3, bio = ?4, \
                 interests = ?5, preferences = ?6 WHERE id = ?7",
                params![
                    user.first_name,
                    user.last_name,
                    user.age.map(i64::from),
                    user.bio,
                    serde_json::to_string(&user.interests)?,
                    serde_json::to_string(&user.preferences)?,
                    id.to_string(),
                ],
            )?;

            Ok(user)
        })
    }

    /// The first photo a user uploads becomes the main one automatically.
    pub fn add_photo(&self, id: Uuid, url: &str, is_main: bool) -> Result<Photo> {
        self.with_conn(|conn| {
            let mut user = query_user(conn, id)?.ok_or(StoreError::UserNotFound)?;

            let make_main = is_main || user.photos.is_empty();
            if make_main {
                for photo in &mut user.photos {
                    photo.is_main = false;
                }
            }

            let photo = Photo {
                id: Uuid::new_v4(),
                url: url.to_string(),
                is_main: make_main,
                uploaded_at: chrono::Utc::now(),
            };
            user.photos.push(photo.clone());

            write_photos(conn, id, &user.photos)?;
            Ok(photo)
        })
    }

    pub fn remove_photo(&self, id: Uuid, photo_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            let mut user = query_user(conn, id)?.ok_or(StoreError::UserNotFound)?;

            let before = user.photos.len();
            user.photos.retain(|p| p.id != photo_id);
            if user.photos.len() == before {
                return Err(StoreError::PhotoNotFound);
            }

            write_photos(conn, id, &user.photos)?;
            Ok(())
        })
    }

    pub fn set_main_photo(&self, id: Uuid, photo_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            let mut user = query_user(conn, id)?.ok_or(StoreError::UserNotFound)?;

            if !user.photos.iter().any(|p| p.id == photo_id) {
                return Err(StoreError::PhotoNotFound);
            }
            for photo in &mut user.photos {
                photo.is_main = photo.id == photo_id;
            }

            write_photos(conn, id, &user.photos)?;
            Ok(())
        })
    }

    pub fn update_location(&self, id: Uuid, location: &Location) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET location = ?1 WHERE id = ?2",
                params![serde_json::to_string(location)?, id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::UserNotFound);
            }
            Ok(())
        })
    }

    pub fn update_settings(
        &self,
        id: Uuid,
        notifications: Option<&NotificationSettings>,
        privacy: Option<&PrivacySettings>,
    ) -> Result<Settings> {
        self.with_conn(|conn| {
            let mut user = query_user(conn, id)?.ok_or(StoreError::UserNotFound)?;

            if let Some(n) = notifications {
                user.settings.notifications = n.clone();
            }
            if let Some(p) = privacy {
                user.settings.privacy = p.clone();
            }

            conn.execute(
                "UPDATE users SET settings = ?1 WHERE id = ?2",
                params![serde_json::to_string(&user.settings)?, id.to_string()],
            )?;
            Ok(user.settings)
        })
    }

    pub fn touch_last_seen(&self, id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen = ?1 WHERE id = ?2",
                params![now_rfc3339(), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Deactivated users stop appearing as candidates and can no longer be
    /// swiped on; their data stays in place.
    pub fn deactivate(&self, id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_active = 0 WHERE id = ?1",
                [id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::UserNotFound);
            }
            Ok(())
        })
    }

    /// Candidate selection: active users the requester has never swiped on.
    /// Any recorded swipe (pass included) excludes a user permanently.
    /// Random order; fetches one extra row to derive `has_more`.
    pub fn next_candidates(&self, user_id: Uuid, limit: u32) -> Result<(Vec<UserRow>, bool)> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE id != ?1 AND is_active = 1 \
                   AND NOT EXISTS (SELECT 1 FROM swipes \
                                   WHERE actor_id = ?1 AND target_id = users.id) \
                 ORDER BY RANDOM() \
                 LIMIT ?2"
            ))?;

            let mut rows: Vec<UserRow> = stmt
                .query_map(params![user_id.to_string(), limit + 1], user_from_row)?
                .collect::<std::result::Result<_, _>>()?;

            let has_more = rows.len() > limit as usize;
            rows.truncate(limit as usize);
            Ok((rows, has_more))
        })
    }
}

pub(crate) fn query_user(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    let row = conn
        .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?
        .query_row([id.to_string()], user_from_row)
        .optional()?;
    Ok(row)
}

fn write_photos(conn: &Connection, id: Uuid, photos: &[Photo]) -> Result<()> {
    conn.execute(
        "UPDATE users SET photos = ?1 WHERE id = ?2",
        params![serde_json::to_string(photos)?, id.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{complete_user, new_telegram_user};

    #[test]
    fn upsert_creates_then_recognizes() {
        let db = Database::open_in_memory().unwrap();

        let (user, created) = db.upsert_telegram_user(&new_telegram_user(100, "Ana")).unwrap();
        assert!(created);
        assert_eq!(user.telegram_id, 100);
        assert_eq!(user.first_name, "Ana");

        let (again, created) = db.upsert_telegram_user(&new_telegram_user(100, "Ana")).unwrap();
        assert!(!created);
        assert_eq!(again.id, user.id);
        assert!(again.last_seen >= user.last_seen);
    }

    #[test]
    fn first_photo_becomes_main() {
        let db = Database::open_in_memory().unwrap();
        let user = complete_user(&db, 1, "Ana");

        let first = db.add_photo(user, "/p/one.jpg", false).unwrap();
        let photos = db.require_user(user).unwrap().photos;
        assert!(photos.iter().find(|p| p.id == first.id).unwrap().is_main);

        let second = db.add_photo(user, "/p/two.jpg", true).unwrap();
        let photos = db.require_user(user).unwrap().photos;
        assert!(photos.iter().find(|p| p.id == second.id).unwrap().is_main);
        assert!(!photos.iter().find(|p| p.id == first.id).unwrap().is_main);
    }

    #[test]
    fn set_main_photo_is_exclusive() {
        let db = Database::open_in_memory().unwrap();
        let user = complete_user(&db, 1, "Ana");
        let a = db.add_photo(user, "/p/a.jpg", false).unwrap();
        let b = db.add_photo(user, "/p/b.jpg", false).unwrap();

        db.set_main_photo(user, b.id).unwrap();
        let photos = db.require_user(user).unwrap().photos;
        assert!(photos.iter().find(|p| p.id == b.id).unwrap().is_main);
        assert!(!photos.iter().find(|p| p.id == a.id).unwrap().is_main);

        assert!(matches!(
            db.set_main_photo(user, Uuid::new_v4()),
            Err(StoreError::PhotoNotFound)
        ));
    }

    #[test]
    fn remove_unknown_photo_fails() {
        let db = Database::open_in_memory().unwrap();
        let user = complete_user(&db, 1, "Ana");
        db.add_photo(user, "/p/a.jpg", false).unwrap();

        assert!(matches!(
            db.remove_photo(user, Uuid::new_v4()),
            Err(StoreError::PhotoNotFound)
        ));
    }

    #[test]
    fn profile_completeness_tracks_missing_fields() {
        let db = Database::open_in_memory().unwrap();
        let mut new = new_telegram_user(1, "Ana");
        new.age = None;
        new.bio = None;
        let (user, _) = db.upsert_telegram_user(&new).unwrap();

        let missing = user.missing_profile_fields();
        assert_eq!(missing, vec!["age", "bio", "photos"]);
        assert!(!user.is_profile_complete());

        db.update_profile(
            user.id,
            &UpdateProfileRequest {
                first_name: None,
                last_name: None,
                age: Some(27),
                bio: Some("hello".into()),
                interests: None,
                preferences: None,
            },
        )
        .unwrap();
        db.add_photo(user.id, "/p/a.jpg", true).unwrap();

        assert!(db.require_user(user.id).unwrap().is_profile_complete());
    }

    #[test]
    fn candidates_exclude_self_inactive_and_swiped() {
        let db = Database::open_in_memory().unwrap();
        let me = complete_user(&db, 1, "Me");
        let active = complete_user(&db, 2, "Active");
        let retired = complete_user(&db, 3, "Retired");
        let passed = complete_user(&db, 4, "Passed");
        db.deactivate(retired).unwrap();
        db.record_swipe(me, passed, ember_types::models::SwipeAction::Pass)
            .unwrap();

        // A pass is permanent: repeat calls never surface the user again.
        for _ in 0..5 {
            let (candidates, has_more) = db.next_candidates(me, 10).unwrap();
            let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
            assert_eq!(ids, vec![active]);
            assert!(!has_more);
        }
    }

    #[test]
    fn candidate_batches_report_has_more() {
        let db = Database::open_in_memory().unwrap();
        let me = complete_user(&db, 1, "Me");
        for n in 0..5 {
            complete_user(&db, 10 + n, "Other");
        }

        let (batch, has_more) = db.next_candidates(me, 3).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(has_more);

        let (batch, has_more) = db.next_candidates(me, 5).unwrap();
        assert_eq!(batch.len(), 5);
        assert!(!has_more);
    }

    #[test]
    fn settings_merge_preserves_other_half() {
        let db = Database::open_in_memory().unwrap();
        let user = complete_user(&db, 1, "Ana");

        let mut notifications = NotificationSettings::default();
        notifications.likes = false;
        let settings = db.update_settings(user, Some(&notifications), None).unwrap();
        assert!(!settings.notifications.likes);
        assert!(settings.privacy.show_age);

        let mut privacy = PrivacySettings::default();
        privacy.show_online_status = false;
        let settings = db.update_settings(user, None, Some(&privacy)).unwrap();
        assert!(!settings.notifications.likes, "privacy update must not reset notifications");
        assert!(!settings.privacy.show_online_status);
    }
}
