pub mod ids;
pub mod models;
pub mod pii;

pub use ids::BookingId;
pub use models::{BookingStatus, BookingType, PaymentStatus};
pub use pii::Masked;
