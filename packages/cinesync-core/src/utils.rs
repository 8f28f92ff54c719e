//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Room Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Length of generated room identifiers.
pub const ROOM_ID_LEN: usize = 6;

/// Alphabet for room codes: uppercase alphanumerics without the
/// easily-confused characters (0, O, I, 1). Codes are meant to be read
/// aloud or typed from a shared link.
const ROOM_ID_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generates a new six-character room identifier.
#[must_use]
pub fn generate_room_id() -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_CHARS[rng.gen_range(0..ROOM_ID_CHARS.len())] as char)
        .collect()
}

/// Validates a room identifier shape without hitting the store.
///
/// Accepts exactly [`ROOM_ID_LEN`] characters from the room-code alphabet.
#[must_use]
pub fn is_valid_room_id(id: &str) -> bool {
    id.len() == ROOM_ID_LEN && id.bytes().all(|b| ROOM_ID_CHARS.contains(&b))
}

/// Trims a display name and enforces a sane length bound.
///
/// Returns `None` when the trimmed name is empty or longer than 64 characters.
#[must_use]
pub fn normalize_display_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 64 {
        None
    } else {
        Some(trimmed.to_string())
    }
}
