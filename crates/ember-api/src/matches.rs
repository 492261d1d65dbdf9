use axum::response::IntoResponse;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use ember_db::models::MatchEntry;
use ember_types::api::{
    Claims, LikeEntry, LikesResponse, MatchDetailResponse, MatchStatsResponse, MatchSummary,
    MatchesResponse, SwipeHistoryEntry, SwipeHistoryResponse, SwipeRequest, SwipeResponse,
};
use ember_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::run_blocking;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub skip: Option<u32>,
}

/// Record a swipe. When it completes a mutual like both parties get a
/// MatchCreate push on their live connections.
pub async fn swipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SwipeRequest>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let target_id = req.target_user_id;
    let outcome = run_blocking(move || db.record_swipe(claims.sub, target_id, req.action)).await?;

    if outcome.is_match {
        info!("match between {} and {}", claims.sub, target_id);
        notify_match(&state, claims.sub, target_id).await;
    }

    Ok(Json(SwipeResponse {
        is_match: outcome.is_match,
        action: req.action,
    }))
}

pub async fn list_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let entries = run_blocking(move || db.list_matches(claims.sub)).await?;

    let now = chrono::Utc::now();
    Ok(Json(MatchesResponse {
        matches: entries.into_iter().map(|e| to_summary(e, now)).collect(),
    }))
}

pub async fn match_detail(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let entry = run_blocking(move || db.get_match(claims.sub, user_id)).await?;
    Ok(Json(MatchDetailResponse {
        detail: to_summary(entry, chrono::Utc::now()),
    }))
}

/// Sever the match: both swipe rows go away and the conversation history is
/// purged in the same transaction. The other party is told immediately.
pub async fn unmatch(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    run_blocking(move || db.unmatch(claims.sub, user_id)).await?;

    state
        .dispatcher
        .send_to_user(user_id, GatewayEvent::Unmatched { user_id: claims.sub })
        .await;

    Ok(Json(json!({ "message": "Unmatched successfully" })))
}

pub async fn swipe_history(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(50).min(100);
    let skip = query.skip.unwrap_or(0);

    let db = state.db.clone();
    let (rows, has_more) = run_blocking(move || db.swipe_history(claims.sub, limit, skip)).await?;

    let now = chrono::Utc::now();
    Ok(Json(SwipeHistoryResponse {
        swipes: rows
            .into_iter()
            .map(|r| SwipeHistoryEntry {
                target: r.user.to_public_profile(now),
                action: r.action,
                created_at: r.created_at,
            })
            .collect(),
        has_more,
    }))
}

pub async fn likes_received(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(20).min(100);
    let skip = query.skip.unwrap_or(0);

    let db = state.db.clone();
    let (rows, has_more) =
        run_blocking(move || db.likes_received(claims.sub, limit, skip)).await?;
    Ok(Json(to_likes_response(rows, has_more)))
}

pub async fn likes_sent(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(20).min(100);
    let skip = query.skip.unwrap_or(0);

    let db = state.db.clone();
    let (rows, has_more) = run_blocking(move || db.likes_sent(claims.sub, limit, skip)).await?;
    Ok(Json(to_likes_response(rows, has_more)))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let stats = run_blocking(move || db.match_stats(claims.sub)).await?;
    Ok(Json(MatchStatsResponse { stats }))
}

fn to_summary(entry: MatchEntry, now: chrono::DateTime<chrono::Utc>) -> MatchSummary {
    MatchSummary {
        user_id: entry.user.id,
        user: entry.user.to_public_profile(now),
        matched_at: entry.matched_at,
        last_message: entry.last_message.as_ref().map(|m| m.to_last_message()),
    }
}

fn to_likes_response(
    rows: Vec<ember_db::models::SwipeWithProfile>,
    has_more: bool,
) -> LikesResponse {
    let now = chrono::Utc::now();
    LikesResponse {
        likes: rows
            .into_iter()
            .map(|r| LikeEntry {
                user: r.user.to_public_profile(now),
                action: r.action,
                created_at: r.created_at,
            })
            .collect(),
        has_more,
    }
}

/// Push MatchCreate to both sides of a fresh match, with the counterpart's
/// name and photo for the celebration card.
async fn notify_match(state: &AppState, a: Uuid, b: Uuid) {
    let db = state.db.clone();
    let profiles = run_blocking(move || {
        let first = db.require_user(a)?;
        let second = db.require_user(b)?;
        Ok((first, second))
    })
    .await;

    let Ok((first, second)) = profiles else {
        // The match stands either way; the push is best-effort.
        return;
    };

    state
        .dispatcher
        .send_to_user(
            b,
            GatewayEvent::MatchCreate {
                user_id: first.id,
                first_name: first.first_name.clone(),
                photo_url: first.main_photo_url().map(String::from),
            },
        )
        .await;
    state
        .dispatcher
        .send_to_user(
            a,
            GatewayEvent::MatchCreate {
                user_id: second.id,
                first_name: second.first_name.clone(),
                photo_url: second.main_photo_url().map(String::from),
            },
        )
        .await;
}
