use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, extract::State};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use ember_db::Database;
use ember_db::users::NewTelegramUser;
use ember_gateway::dispatcher::Dispatcher;
use ember_types::api::{AuthResponse, Claims, TelegramAuthRequest};

use crate::error::{ApiError, ApiResult};
use crate::users::{validate_age, validate_bio};
use crate::{run_blocking, telegram};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    /// When unset, initData is parsed but not signature-checked (dev mode).
    pub bot_token: Option<String>,
}

/// Login and registration in one request. A known telegram id logs straight
/// in; an unknown one needs the minimal profile fields to register.
pub async fn telegram_login(
    State(state): State<AppState>,
    Json(req): Json<TelegramAuthRequest>,
) -> ApiResult<impl IntoResponse> {
    let tg_user = telegram::parse_and_verify(&req.init_data, state.bot_token.as_deref())?;

    let db = state.db.clone();
    let telegram_id = tg_user.id;
    let existing = run_blocking(move || db.get_user_by_telegram_id(telegram_id)).await?;

    if let Some(user) = existing {
        let db = state.db.clone();
        let user_id = user.id;
        run_blocking(move || db.touch_last_seen(user_id)).await?;

        let token = create_token(&state.jwt_secret, user.id, user.telegram_id)?;
        return Ok((
            StatusCode::OK,
            Json(AuthResponse {
                user: user.into_own_profile(),
                token,
            }),
        ));
    }

    // Registration path: gender and looking_for are required up front.
    validate_age(req.age)?;
    validate_bio(req.bio.as_deref())?;
    let gender = req
        .gender
        .ok_or_else(|| ApiError::BadRequest("Gender is required".into()))?;
    let looking_for = req
        .looking_for
        .ok_or_else(|| ApiError::BadRequest("Looking for preference is required".into()))?;
    let first_name = req
        .first_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&tg_user.first_name)
        .to_string();

    let new_user = NewTelegramUser {
        telegram_id: tg_user.id,
        username: tg_user.username,
        first_name,
        last_name: req.last_name.or(tg_user.last_name),
        age: req.age,
        gender,
        looking_for,
        bio: req.bio,
        interests: req.interests.unwrap_or_default(),
    };

    let db = state.db.clone();
    let (user, _created) = run_blocking(move || db.upsert_telegram_user(&new_user)).await?;

    let token = create_token(&state.jwt_secret, user.id, user.telegram_id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.into_own_profile(),
            token,
        }),
    ))
}

pub(crate) fn create_token(secret: &str, user_id: Uuid, telegram_id: i64) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id,
        telegram_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("failed to sign token: {e}");
        ApiError::Internal
    })
}
