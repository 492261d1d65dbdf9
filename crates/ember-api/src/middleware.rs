use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation, decode};

use ember_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;

/// Extract and validate the bearer JWT, then confirm the account is still
/// live. Deactivated accounts keep their rows but lose API access.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    let claims = token_data.claims;
    let db = state.db.clone();
    let user_id = claims.sub;
    let user = run_blocking(move || db.get_user(user_id))
        .await?
        .ok_or(ApiError::Unauthorized)?;
    if !user.is_active {
        return Err(ApiError::AccountDeactivated);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
