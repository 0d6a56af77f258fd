use std::sync::Arc;

use horizon_booking::{BookingCoordinator, RecoveryQueue};

#[derive(Clone)]
pub struct AuthSettings {
    pub secret: String,
    pub expiration_seconds: u64,
}

#[derive(Clone)]
pub struct AppState {
    /// Base coordinator bound to no identity; handlers rebind it to the
    /// authenticated caller with `with_identity`.
    pub coordinator: BookingCoordinator,
    pub recovery: Arc<RecoveryQueue>,
    pub auth: AuthSettings,
}
