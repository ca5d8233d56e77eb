// Room codes: the short shared identifier that binds a host and its
// controllers into one relay session.
//
// A code is exactly six characters from `[A-Z0-9]`. Codes are generated on
// the client (the host device) and persisted in client-local storage so a
// device resumes the same session across restarts; the relay treats them as
// opaque strings and never validates them.

use std::fmt;
use std::str::FromStr;

use dune_timer_prng::CodeRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of characters in a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Symbols a room code may contain.
pub const ROOM_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Why a string is not a valid room code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomCodeError {
    #[error("room code must be {expected} characters, got {found}")]
    InvalidLength { expected: usize, found: usize },
    #[error("invalid character {ch:?} at position {index}")]
    InvalidCharacter { ch: char, index: usize },
}

/// A validated six-character room code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Parse a code, upper-casing it first so codes typed by hand on a phone
    /// keyboard still match.
    pub fn parse(value: &str) -> Result<Self, RoomCodeError> {
        let upper = value.trim().to_ascii_uppercase();
        let found = upper.chars().count();
        if found != ROOM_CODE_LEN {
            return Err(RoomCodeError::InvalidLength {
                expected: ROOM_CODE_LEN,
                found,
            });
        }
        for (index, ch) in upper.chars().enumerate() {
            if !ch.is_ascii() || !ROOM_CODE_ALPHABET.contains(&(ch as u8)) {
                return Err(RoomCodeError::InvalidCharacter { ch, index });
            }
        }
        Ok(Self(upper))
    }

    /// Draw a fresh code from `rng`.
    pub fn generate(rng: &mut CodeRng) -> Self {
        let code = (0..ROOM_CODE_LEN)
            .map(|_| char::from(*rng.pick(&ROOM_CODE_ALPHABET[..])))
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        let mut rng = CodeRng::new(5);
        for _ in 0..200 {
            let code = RoomCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
            assert_eq!(RoomCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn parse_normalises_case_and_whitespace() {
        let code = RoomCode::parse(" ab12cd ").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!(
            RoomCode::parse("ABC"),
            Err(RoomCodeError::InvalidLength {
                expected: 6,
                found: 3
            })
        );
    }

    #[test]
    fn parse_rejects_symbols() {
        assert_eq!(
            RoomCode::parse("AB-12C"),
            Err(RoomCodeError::InvalidCharacter { ch: '-', index: 2 })
        );
        assert!(matches!(
            RoomCode::parse("ABÉ12C"),
            Err(RoomCodeError::InvalidCharacter { index: 2, .. })
        ));
    }

    #[test]
    fn serde_validates_on_the_way_in() {
        let code: RoomCode = serde_json::from_str("\"qw3rty\"").unwrap();
        assert_eq!(code.as_str(), "QW3RTY");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"QW3RTY\"");
        assert!(serde_json::from_str::<RoomCode>("\"nope\"").is_err());
    }
}
