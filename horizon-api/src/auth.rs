use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::auth::{CustomerClaims, ROLE_CUSTOMER};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub user_id: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    ROLE_CUSTOMER.to_string()
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
    expires_in: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/token", post(issue_token))
}

/// Dev/test token issuance. In production the identity provider in front of
/// this service signs the customer tokens.
async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let expires_in = state.auth.expiration_seconds;
    let claims = CustomerClaims {
        sub: req.user_id,
        email: req.email,
        role: req.role,
        exp: (Utc::now().timestamp().max(0) as u64 + expires_in) as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.auth.secret.as_bytes()),
    )
    .map_err(|e| AppError::Anyhow(e.into()))?;

    Ok(Json(TokenResponse { token, expires_in }))
}
