use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use ember_types::api::{
    AddPhotoRequest, CandidatesResponse, Claims, UpdateLocationRequest, UpdateProfileRequest,
    UpdateSettingsRequest,
};
use ember_types::models::Location;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

#[derive(Debug, Deserialize)]
pub struct CandidateQuery {
    #[serde(default = "default_candidate_limit")]
    pub limit: u32,
}

fn default_candidate_limit() -> u32 {
    20
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let user = run_blocking(move || db.require_user(claims.sub)).await?;
    Ok(Json(json!({ "user": user.into_own_profile() })))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_age(req.age)?;
    validate_bio(req.bio.as_deref())?;
    if let Some(name) = &req.first_name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("First name cannot be empty".into()));
        }
    }

    let db = state.db.clone();
    let user = run_blocking(move || db.update_profile(claims.sub, &req)).await?;
    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": user.into_own_profile(),
    })))
}

pub async fn add_photo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddPhotoRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.url.trim().is_empty() {
        return Err(ApiError::BadRequest("Photo URL is required".into()));
    }

    let db = state.db.clone();
    let photo = run_blocking(move || db.add_photo(claims.sub, req.url.trim(), req.is_main)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Photo added successfully", "photo": photo })),
    ))
}

pub async fn set_main_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || db.set_main_photo(claims.sub, photo_id)).await?;
    Ok(Json(json!({ "message": "Main photo updated successfully" })))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || db.remove_photo(claims.sub, photo_id)).await?;
    Ok(Json(json!({ "message": "Photo deleted successfully" })))
}

pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateLocationRequest>,
) -> ApiResult<impl IntoResponse> {
    if !(-90.0..=90.0).contains(&req.latitude) {
        return Err(ApiError::BadRequest("Invalid latitude".into()));
    }
    if !(-180.0..=180.0).contains(&req.longitude) {
        return Err(ApiError::BadRequest("Invalid longitude".into()));
    }

    let location = Location {
        latitude: req.latitude,
        longitude: req.longitude,
        city: req.city,
        country: req.country,
    };

    let db = state.db.clone();
    let stored = location.clone();
    run_blocking(move || db.update_location(claims.sub, &stored)).await?;
    Ok(Json(json!({
        "message": "Location updated successfully",
        "location": location,
    })))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateSettingsRequest>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let settings = run_blocking(move || {
        db.update_settings(claims.sub, req.notifications.as_ref(), req.privacy.as_ref())
    })
    .await?;
    Ok(Json(json!({
        "message": "Settings updated successfully",
        "settings": settings,
    })))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || db.deactivate(claims.sub)).await?;
    Ok(Json(json!({ "message": "Account deactivated successfully" })))
}

/// The candidate feed. Requires a complete profile; any user with a recorded
/// swipe from the caller never reappears here.
pub async fn candidates(
    State(state): State<AppState>,
    Query(query): Query<CandidateQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let me = run_blocking(move || db.require_user(claims.sub)).await?;
    let missing = me.missing_profile_fields();
    if !missing.is_empty() {
        return Err(ApiError::ProfileIncomplete(missing));
    }

    let db = state.db.clone();
    let limit = query.limit.min(50);
    let (rows, has_more) = run_blocking(move || db.next_candidates(claims.sub, limit)).await?;

    let now = chrono::Utc::now();
    Ok(Json(CandidatesResponse {
        candidates: rows.iter().map(|u| u.to_public_profile(now)).collect(),
        has_more,
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let user = run_blocking(move || db.require_user(user_id)).await?;
    Ok(Json(json!({ "user": user.to_public_profile(chrono::Utc::now()) })))
}

pub(crate) fn validate_age(age: Option<u8>) -> ApiResult<()> {
    if let Some(age) = age {
        if !(18..=100).contains(&age) {
            return Err(ApiError::BadRequest("Age must be between 18 and 100".into()));
        }
    }
    Ok(())
}

pub(crate) fn validate_bio(bio: Option<&str>) -> ApiResult<()> {
    if let Some(bio) = bio {
        if bio.chars().count() > 500 {
            return Err(ApiError::BadRequest("Bio cannot exceed 500 characters".into()));
        }
    }
    Ok(())
}
