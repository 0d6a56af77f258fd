use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::BookingType;

const ID_PREFIX: &str = "HR";
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RANDOM_SUFFIX_LEN: usize = 6;

/// Human-legible booking identifier: `HR-{type code}-{time}-{random}`.
///
/// The time component is the Unix timestamp in microseconds rendered in
/// base-36, so the clock resolution is far finer than any realistic commit
/// rate; the random suffix covers concurrent generation within one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct BookingId(String);

impl BookingId {
    pub fn generate(booking_type: BookingType) -> Self {
        let micros = Utc::now().timestamp_micros().max(0) as u64;
        let mut rng = rand::thread_rng();
        let suffix: String = (0..RANDOM_SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        BookingId(format!(
            "{}-{}-{}-{}",
            ID_PREFIX,
            booking_type.type_code(),
            encode_base36(micros),
            suffix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BookingId {
    fn from(s: String) -> Self {
        BookingId(s)
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while value > 0 {
        buf.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    // Safety: BASE36 is ASCII.
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_shape_matches_scheme() {
        let id = BookingId::generate(BookingType::Tour);
        assert!(id.as_str().starts_with("HR-BT-"), "got {}", id);
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[3].len(), RANDOM_SUFFIX_LEN);
    }

    #[test]
    fn test_type_codes_distinct() {
        assert!(BookingId::generate(BookingType::Vehicle)
            .as_str()
            .starts_with("HR-BV-"));
        assert!(BookingId::generate(BookingType::CuratedExperience)
            .as_str()
            .starts_with("HR-BC-"));
        assert!(BookingId::generate(BookingType::Experience)
            .as_str()
            .starts_with("HR-BE-"));
    }

    #[test]
    fn test_rapid_generation_yields_no_duplicates() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = BookingId::generate(BookingType::Tour);
            assert!(seen.insert(id.as_str().to_string()), "duplicate: {}", id);
        }
    }

    #[test]
    fn test_base36_encoding() {
        assert_eq!(encode_base36(0), "0");
        assert_eq!(encode_base36(35), "Z");
        assert_eq!(encode_base36(36), "10");
    }
}
