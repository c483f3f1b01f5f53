//! PGN-style movetext stored on the room row, e.g. `1. e4 e5 2. Nf3`.
//!
//! The move table is the source of truth; the movetext is a convenience
//! copy that a client can show without fetching every move row.

use rookline_protocol::Color;

use crate::Promotion;

/// Appends one move in standard algebraic notation.
///
/// `fullmove_number` is the number of the move being played, i.e. the
/// position's full-move number before the move was applied.
pub fn append(log: &str, mover: Color, fullmove_number: u32, san: &str) -> String {
    let entry = match mover {
        Color::White => format!("{fullmove_number}. {san}"),
        Color::Black if log.is_empty() => format!("{fullmove_number}... {san}"),
        Color::Black => san.to_string(),
    };
    if log.is_empty() {
        entry
    } else {
        format!("{log} {entry}")
    }
}

/// Splits movetext back into SAN tokens, dropping move numbers.
pub fn sans(log: &str) -> Vec<&str> {
    log.split_whitespace()
        .filter(|token| !token.ends_with('.'))
        .collect()
}

/// The promotion piece encoded in a SAN token (`e8=Q+` → queen).
pub fn promotion(san: &str) -> Option<Promotion> {
    san.split_once('=')
        .and_then(|(_, rest)| rest.chars().next())
        .and_then(Promotion::from_letter)
}
