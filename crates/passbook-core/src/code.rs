//! Redemption codes
//!
//! A redemption code is 24 characters from the Crockford base-32 alphabet.
//! The first 22 characters are opaque to the client; the final two are a
//! base-32 suffix giving the number of tickets the code is worth.

use crate::error::CodeError;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Total code length
pub const CODE_LENGTH: usize = 24;

/// Length of the ticket-count suffix
pub const COUNT_SUFFIX_LENGTH: usize = 2;

/// Largest ticket count a code can carry
pub const MAX_CODE_TICKETS: u32 = 32 * 32 - 1;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Validated 24-character redemption code
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RedemptionCode(String);

impl RedemptionCode {
    /// Parse a user-supplied code
    ///
    /// Case is ignored and `-`/whitespace separators are stripped before
    /// validation, so codes can be shown in groups and pasted back.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let normalized: String = input
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let actual = normalized.chars().count();
        if actual != CODE_LENGTH {
            return Err(CodeError::InvalidLength {
                expected: CODE_LENGTH,
                actual,
            });
        }

        for (position, ch) in normalized.chars().enumerate() {
            if symbol_value(ch).is_none() {
                return Err(CodeError::InvalidCharacter { ch, position });
            }
        }

        let code = Self(normalized);
        if code.ticket_count() == 0 {
            return Err(CodeError::ZeroCount);
        }
        Ok(code)
    }

    /// Build a code worth `count` tickets with a random body
    pub fn generate<R: RngCore + CryptoRng>(count: u32, rng: &mut R) -> Result<Self, CodeError> {
        if count == 0 || count > MAX_CODE_TICKETS {
            return Err(CodeError::CountOutOfRange {
                count,
                max: MAX_CODE_TICKETS,
            });
        }
        let mut body = [0u8; CODE_LENGTH - COUNT_SUFFIX_LENGTH];
        rng.fill_bytes(&mut body);

        let mut code = String::with_capacity(CODE_LENGTH);
        code.extend(body.iter().map(|b| ALPHABET[usize::from(b & 0x1F)] as char));
        code.push(ALPHABET[(count / 32) as usize] as char);
        code.push(ALPHABET[(count % 32) as usize] as char);
        Ok(Self(code))
    }

    /// Number of tickets this code is worth
    #[must_use]
    pub fn ticket_count(&self) -> u32 {
        let mut suffix = self.0.chars().skip(CODE_LENGTH - COUNT_SUFFIX_LENGTH);
        let hi = suffix.next().and_then(symbol_value).unwrap_or(0);
        let lo = suffix.next().and_then(symbol_value).unwrap_or(0);
        hi * 32 + lo
    }

    /// Raw code string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Code in six groups of four for display
    #[must_use]
    pub fn grouped(&self) -> String {
        self.0
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

fn symbol_value(ch: char) -> Option<u32> {
    let byte = u8::try_from(ch).ok()?;
    ALPHABET
        .iter()
        .position(|&a| a == byte)
        .and_then(|p| u32::try_from(p).ok())
}

impl FromStr for RedemptionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RedemptionCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RedemptionCode> for String {
    fn from(code: RedemptionCode) -> Self {
        code.0
    }
}

impl fmt::Display for RedemptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Codes are bearer value; keep the body out of debug output.
impl fmt::Debug for RedemptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RedemptionCode(..{}; {} tickets)", &self.0[CODE_LENGTH - 4..], self.ticket_count())
    }
}
