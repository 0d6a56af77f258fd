use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

use horizon_booking::{Booking, BookingCoordinator, BookingDraft, BookingError};
use horizon_core::FixedIdentity;
use horizon_shared::{BookingId, BookingStatus};

use crate::error::AppError;
use crate::middleware::auth::{customer_auth_middleware, CustomerClaims};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct BookingResponse {
    booking_id: BookingId,
    status: BookingStatus,
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: BookingStatus,
}

#[derive(Debug, Deserialize)]
struct AttachVoucherRequest {
    voucher_url: String,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route("/v1/bookings/stream", get(stream_bookings))
        .route("/v1/bookings/{id}", get(fetch_booking))
        .route("/v1/bookings/{id}/status", post(update_status))
        .route("/v1/bookings/{id}/voucher", post(attach_voucher))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            customer_auth_middleware,
        ))
}

/// Rebind the shared coordinator to the authenticated caller.
fn scoped(state: &AppState, claims: &CustomerClaims) -> BookingCoordinator {
    state
        .coordinator
        .with_identity(Arc::new(FixedIdentity::caller(claims.identity())))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(draft): Json<BookingDraft>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let coordinator = scoped(&state, &claims);
    match coordinator.create_booking(draft.clone()).await {
        Ok(booking_id) => {
            let status = coordinator
                .get_booking(&booking_id)
                .await?
                .map(|b| b.status)
                .unwrap_or(BookingStatus::Pending);
            Ok((
                StatusCode::CREATED,
                Json(BookingResponse { booking_id, status }),
            ))
        }
        Err(err @ BookingError::CommitFailed { .. }) => {
            // Defer the draft for background replay; the caller is still
            // told the commit failed and may resubmit.
            state.recovery.enqueue(draft, claims.identity());
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let bookings = scoped(&state, &claims).get_user_bookings().await?;
    Ok(Json(bookings))
}

async fn fetch_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let id = BookingId::from(id);
    match scoped(&state, &claims).get_booking(&id).await? {
        Some(booking) => Ok(Json(booking)),
        None => Err(BookingError::NotFound(id).into()),
    }
}

async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let id = BookingId::from(id);
    scoped(&state, &claims)
        .update_booking_status(&id, req.status)
        .await?;
    Ok(Json(BookingResponse {
        booking_id: id,
        status: req.status,
    }))
}

async fn attach_voucher(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<String>,
    Json(req): Json<AttachVoucherRequest>,
) -> Result<StatusCode, AppError> {
    let id = BookingId::from(id);
    scoped(&state, &claims)
        .attach_voucher_url(&id, &req.voucher_url)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// SSE feed of the caller's bookings page. Each event carries the full
/// current result set; bursts of commits collapse per the coordinator's
/// subscription throttle.
async fn stream_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let coordinator = scoped(&state, &claims);
    let (tx, rx) = tokio::sync::mpsc::channel::<Vec<Booking>>(16);
    let subscription = coordinator.subscribe_to_user_bookings(move |bookings| {
        // A full channel means the client is behind a newer snapshot
        // anyway; dropping this one is fine.
        let _ = tx.try_send(bookings);
    })?;

    let stream = ReceiverStream::new(rx).map(move |bookings| {
        // The subscription lives exactly as long as this stream.
        let _keep_alive = &subscription;
        Ok(Event::default()
            .event("bookings")
            .data(serde_json::to_string(&bookings).unwrap_or_default()))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
