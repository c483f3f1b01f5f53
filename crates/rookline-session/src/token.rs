//! The anonymous participant token.
//!
//! A token is generated once per device and kept in a small file so the
//! same seat can be reclaimed after a restart or reconnect.

use std::fs;
use std::io;
use std::path::Path;

use rand::Rng;
use rookline_protocol::ParticipantToken;

/// Length of a token in hex characters (128 bits).
const TOKEN_LEN: usize = 32;

/// Generates a random 32-character hex token (128 bits of entropy).
pub fn generate_token() -> ParticipantToken {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    ParticipantToken(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

fn is_valid(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Reads the token stored at `path`, or generates one and writes it
/// there. A file holding anything but a well-formed token is replaced.
pub fn load_or_create_token(path: &Path) -> io::Result<ParticipantToken> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let stored = contents.trim();
            if is_valid(stored) {
                return Ok(ParticipantToken(stored.to_string()));
            }
            tracing::warn!(path = %path.display(), "malformed participant token, replacing");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let token = generate_token();
    fs::write(path, token.as_str())?;
    tracing::info!(path = %path.display(), participant = %token, "participant token created");
    Ok(token)
}
