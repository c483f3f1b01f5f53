//! Room configuration.

use rookline_protocol::Color;
use rookline_rules::STANDARD_START;

/// Uppercase letters and digits.
pub const DEFAULT_CODE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Configuration for a [`RoomManager`](crate::RoomManager).
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Number of characters in a join code.
    pub code_length: usize,

    /// Characters a join code is drawn from. Codes are matched after
    /// upper-casing, so this should not contain lowercase letters.
    pub code_alphabet: String,

    /// How many fresh codes to try when the store reports a collision.
    pub max_create_attempts: u32,

    /// Serialized position a new room starts from.
    pub initial_position: String,

    /// Side to move in `initial_position`.
    pub first_to_move: Color,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            code_alphabet: DEFAULT_CODE_ALPHABET.to_string(),
            max_create_attempts: 8,
            initial_position: STANDARD_START.to_string(),
            first_to_move: Color::White,
        }
    }
}
