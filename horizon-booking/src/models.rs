use chrono::{DateTime, NaiveDate, Utc};
use horizon_core::Identity;
use horizon_shared::{BookingId, BookingStatus, BookingType, Masked, PaymentStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to the booked catalog item, denormalized at commit time so a
/// booking stays renderable even if the catalog entry changes later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedItem {
    pub id: String,
    pub title: String,
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub age: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: Masked<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDetails {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub participant_count: u32,
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub emergency_contact: Option<EmergencyContact>,
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInfo {
    /// Opaque confirmation token from the payment gateway; never validated
    /// here, never mutated after commit.
    pub token: String,
    /// Amount in minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

/// The durable record of a purchase. Id, owner, and payment token are
/// immutable once committed; only `status`, `updated_at`, and `voucher_url`
/// change afterwards. Cancellation is a status change, never a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: String,
    pub booking_type: BookingType,
    pub item: BookedItem,
    pub contact: CustomerContact,
    pub details: BookingDetails,
    pub payment: PaymentInfo,
    pub status: BookingStatus,
    #[serde(default)]
    pub voucher_url: Option<String>,
    /// Server-assigned; `None` only on a not-yet-committed instance.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn from_draft(draft: &BookingDraft, caller: &Identity, id: BookingId) -> Self {
        let status = if draft.payment.status == PaymentStatus::Paid {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };
        Booking {
            id,
            user_id: caller.user_id.clone(),
            booking_type: draft.booking_type,
            item: draft.item.clone(),
            contact: draft.contact.clone(),
            details: draft.details.clone(),
            payment: draft.payment.clone(),
            status,
            voucher_url: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Caller-supplied booking request. `user_id` is optional; when present it
/// must match the authenticated caller or the commit is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDraft {
    #[serde(default)]
    pub user_id: Option<String>,
    pub booking_type: BookingType,
    pub item: BookedItem,
    pub contact: CustomerContact,
    pub details: BookingDetails,
    pub payment: PaymentInfo,
}

impl BookingDraft {
    pub fn validate(&self) -> Result<(), String> {
        if self.details.participant_count == 0 {
            return Err("participant count must be at least 1".to_string());
        }
        if self.details.end_date < self.details.start_date {
            return Err("end date precedes start date".to_string());
        }
        if self.payment.amount <= 0 {
            return Err("payment amount must be positive".to_string());
        }
        if self.payment.token.trim().is_empty() {
            return Err("payment confirmation token missing".to_string());
        }
        Ok(())
    }
}

/// Denormalized per-user projection of a Booking for fast "my trips"
/// listings. Written only inside the same commit as its Booking and kept in
/// lockstep on every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripIndexEntry {
    pub booking_id: BookingId,
    pub user_id: String,
    pub booking_type: BookingType,
    pub title: String,
    pub cover_image: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    pub total_amount: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TripIndexEntry {
    /// Derived from the Booking being written, never re-read from the store.
    pub fn project(booking: &Booking) -> Self {
        TripIndexEntry {
            booking_id: booking.id.clone(),
            user_id: booking.user_id.clone(),
            booking_type: booking.booking_type,
            title: booking.item.title.clone(),
            cover_image: booking.item.cover_image.clone(),
            start_date: booking.details.start_date,
            end_date: booking.details.end_date,
            status: booking.status,
            total_amount: booking.payment.amount,
            created_at: None,
        }
    }
}

/// Shared aggregate totals, mutated exclusively through atomic increments.
/// Missing fields read as zero so an untouched store reports empty totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsCounters {
    #[serde(default)]
    pub total_revenue: i64,
    #[serde(default)]
    pub total_bookings: i64,
    #[serde(default)]
    pub bookings_by_type: BTreeMap<String, i64>,
    #[serde(default)]
    pub revenue_by_type: BTreeMap<String, i64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}
