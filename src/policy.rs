//! Password composition policy and strong secret generation

use crate::secret::Secret;
use rand::Rng;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::fmt;

/// Minimum number of characters.
pub const MIN_LENGTH: usize = 8;

/// Minimum number of alphabetic characters.
pub const MIN_LETTERS: usize = 4;

/// Minimum number of ASCII digit characters.
pub const MIN_DIGITS: usize = 4;

/// No single character may occur more often than this.
pub const MAX_REPEATS: usize = 2;

/// Length used when generating a secret for the user.
pub const DEFAULT_GENERATED_LENGTH: usize = 24;

/// ASCII letters, digits and punctuation; no whitespace.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz\
ABCDEFGHIJKLMNOPQRSTUVWXYZ\
0123456789\
!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// The first policy rule a candidate secret violates.
///
/// Messages never quote the candidate or any of its characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort { actual: usize },
    NoUppercase,
    TooFewLetters { actual: usize },
    TooFewDigits { actual: usize },
    RepeatedCharacter { count: usize },
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::TooShort { actual } => write!(
                f,
                "password must be at least {} characters long (got {})",
                MIN_LENGTH, actual
            ),
            PolicyViolation::NoUppercase => {
                write!(f, "password must contain at least one uppercase letter")
            }
            PolicyViolation::TooFewLetters { actual } => write!(
                f,
                "password must contain at least {} letters (got {})",
                MIN_LETTERS, actual
            ),
            PolicyViolation::TooFewDigits { actual } => write!(
                f,
                "password must contain at least {} digits (got {})",
                MIN_DIGITS, actual
            ),
            PolicyViolation::RepeatedCharacter { count } => write!(
                f,
                "no character may appear more than {} times (one appears {} times)",
                MAX_REPEATS, count
            ),
        }
    }
}

impl std::error::Error for PolicyViolation {}

/// Check `candidate` against the composition policy.
///
/// Rules are checked in a fixed order (length, uppercase, letters, digits,
/// repeats) and the first violated one is returned.
pub fn validate(candidate: &str) -> Result<(), PolicyViolation> {
    let length = candidate.chars().count();
    if length < MIN_LENGTH {
        return Err(PolicyViolation::TooShort { actual: length });
    }

    if !candidate.chars().any(char::is_uppercase) {
        return Err(PolicyViolation::NoUppercase);
    }

    let letters = candidate.chars().filter(|c| c.is_alphabetic()).count();
    if letters < MIN_LETTERS {
        return Err(PolicyViolation::TooFewLetters { actual: letters });
    }

    let digits = candidate.chars().filter(char::is_ascii_digit).count();
    if digits < MIN_DIGITS {
        return Err(PolicyViolation::TooFewDigits { actual: digits });
    }

    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in candidate.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    if let Some(&count) = counts.values().max() {
        if count > MAX_REPEATS {
            return Err(PolicyViolation::RepeatedCharacter { count });
        }
    }

    Ok(())
}

/// Generate a random secret of `length` characters using the OS CSPRNG.
///
/// Each character is drawn uniformly from [`ALPHABET`]; whole strings are
/// redrawn until they satisfy [`validate`], so the result is always
/// acceptable under the policy. `length` is raised to [`MIN_LENGTH`] if
/// smaller.
pub fn generate_strong(length: usize) -> Secret {
    let length = length.max(MIN_LENGTH);
    loop {
        let candidate: String = (0..length)
            .map(|_| ALPHABET[OsRng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        let candidate = Secret::new(candidate);
        if validate(candidate.expose()).is_ok() {
            return candidate;
        }
    }
}
