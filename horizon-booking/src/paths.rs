use horizon_core::DocPath;
use horizon_shared::BookingId;

pub const BOOKINGS: &str = "bookings";
pub const TRIP_INDEX: &str = "trip_index";
pub const ANALYTICS: &str = "analytics";

const COUNTERS_DOC: &str = "counters";

pub fn booking(id: &BookingId) -> DocPath {
    DocPath::new(BOOKINGS, id.as_str())
}

pub fn trip_index(id: &BookingId) -> DocPath {
    DocPath::new(TRIP_INDEX, id.as_str())
}

pub fn counters() -> DocPath {
    DocPath::new(ANALYTICS, COUNTERS_DOC)
}
