pub mod coordinator;
pub mod error;
pub mod models;
pub mod paths;
pub mod recovery;


pub use coordinator::{BookingConfig, BookingCoordinator, Subscription};
pub use error::BookingError;
pub use models::{
    AnalyticsCounters, BookedItem, Booking, BookingDetails, BookingDraft, CustomerContact,
    EmergencyContact, Participant, PaymentInfo, TripIndexEntry,
};
pub use recovery::{spawn_reconciler, PendingRecord, RecoveryQueue, SyncState};
