use axum::{extract::State, routing::get, Extension, Json, Router};
use tracing::info;

use horizon_booking::AnalyticsCounters;

use crate::error::AppError;
use crate::middleware::auth::{admin_auth_middleware, has_permission, AdminClaims, ROLE_SUPER_ADMIN};
use crate::state::AppState;

const PERMISSION_ANALYTICS_READ: &str = "analytics.read";

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/analytics/summary", get(summary))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            admin_auth_middleware,
        ))
}

async fn summary(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
) -> Result<Json<AnalyticsCounters>, AppError> {
    if claims.role != ROLE_SUPER_ADMIN && !has_permission(&claims, PERMISSION_ANALYTICS_READ) {
        return Err(AppError::Forbidden(format!(
            "Missing permission: {}",
            PERMISSION_ANALYTICS_READ
        )));
    }
    info!(admin = %claims.sub, "analytics summary requested");
    let counters = state.coordinator.analytics_summary().await?;
    Ok(Json(counters))
}
