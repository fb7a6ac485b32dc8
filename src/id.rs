//! Identifier — time-ordered, monotonic, Crockford Base32 identifiers.
//!
//! Layout: 48-bit millisecond timestamp followed by 80-bit random entropy,
//! encoded as 26 Crockford Base32 characters. Within the same millisecond,
//! entropy increments monotonically so identifiers generated back-to-back
//! by the same generator still sort lexically.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use rand::Rng;

use crate::error::{Error, ErrorKind};

const ENCODED_LEN: usize = 26;
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

fn decode_table() -> &'static [i8; 256] {
    static TABLE: Lazy<[i8; 256]> = Lazy::new(|| {
        let mut table = [-1i8; 256];
        for (i, &c) in CROCKFORD_ALPHABET.iter().enumerate() {
            table[c as usize] = i as i8;
            table[c.to_ascii_lowercase() as usize] = i as i8;
        }
        // Crockford's ambiguous-character aliases.
        table[b'O' as usize] = 0;
        table[b'o' as usize] = 0;
        table[b'I' as usize] = 1;
        table[b'i' as usize] = 1;
        table[b'L' as usize] = 1;
        table[b'l' as usize] = 1;
        table
    });
    &TABLE
}

/// A parsed, validated identifier: 48-bit timestamp + 80-bit entropy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    timestamp_ms: u64,
    entropy: [u8; 10],
}

/// Validation strictness for `Identifier::parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Accept Crockford's ambiguous-character aliases (O/0, I/L/1) and
    /// either case.
    Standard,
    /// Require canonical uppercase, non-aliased characters only.
    Strict,
}

impl Identifier {
    pub fn generate() -> Self {
        default_generator().generate()
    }

    pub fn generate_at(timestamp_ms: u64) -> Self {
        default_generator().generate_at(timestamp_ms)
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        Self::parse_with_mode(s, ValidationMode::Standard)
    }

    pub fn parse_with_mode(s: &str, mode: ValidationMode) -> Result<Self, Error> {
        let bytes = s.as_bytes();
        if bytes.len() != ENCODED_LEN {
            return Err(Error::validation(format!(
                "identifier must be {ENCODED_LEN} characters, got {}",
                bytes.len()
            )));
        }
        if mode == ValidationMode::Strict {
            for &b in bytes {
                if !CROCKFORD_ALPHABET.contains(&b) {
                    return Err(Error::validation(format!(
                        "identifier contains non-canonical character '{}'",
                        b as char
                    )));
                }
            }
        }
        let table = decode_table();
        let mut value: u128 = 0;
        for &b in bytes {
            let digit = table[b as usize];
            if digit < 0 {
                return Err(Error::validation(format!(
                    "identifier contains invalid character '{}'",
                    b as char
                )));
            }
            value = (value << 5) | digit as u128;
        }
        // 26 chars * 5 bits = 130 bits; top 2 bits must be zero for a
        // 128-bit (48 + 80) payload.
        if value.checked_shr(128).unwrap_or(0) != 0 {
            return Err(Error::validation("identifier overflows 128-bit payload"));
        }
        let timestamp_ms = (value >> 80) as u64 & 0xFFFF_FFFF_FFFF;
        let mut entropy = [0u8; 10];
        let entropy_bits = value & ((1u128 << 80) - 1);
        for (i, slot) in entropy.iter_mut().enumerate() {
            let shift = 72 - i * 8;
            *slot = (entropy_bits >> shift) as u8;
        }
        Ok(Identifier {
            timestamp_ms,
            entropy,
        })
    }

    pub fn extract_timestamp(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn compare(&self, other: &Self) -> std::cmp::Ordering {
        self.cmp(other)
    }

    pub fn validate(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Filesystem-safe rendering: identical to `to_string`, since the
    /// alphabet already excludes path separators and shell metacharacters.
    pub fn as_filename(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut value: u128 = (self.timestamp_ms as u128) << 80;
        for (i, &b) in self.entropy.iter().enumerate() {
            value |= (b as u128) << (72 - i * 8);
        }
        let mut out = [0u8; ENCODED_LEN];
        for (i, slot) in out.iter_mut().enumerate().rev() {
            *slot = CROCKFORD_ALPHABET[(value & 0x1F) as usize];
            value >>= 5;
        }
        f.write_str(std::str::from_utf8(&out).expect("crockford alphabet is ascii"))
    }
}

impl std::str::FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A monotonic identifier generator. Safe to share across threads; a single
/// process-wide default is available via [`default_generator`].
pub struct Generator {
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    last_timestamp_ms: u64,
    last_entropy: [u8; 10],
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator {
    pub fn new() -> Self {
        Generator {
            state: Mutex::new(GeneratorState {
                last_timestamp_ms: 0,
                last_entropy: [0u8; 10],
            }),
        }
    }

    pub fn generate(&self) -> Identifier {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64;
        self.generate_at(now_ms)
    }

    pub fn generate_at(&self, timestamp_ms: u64) -> Identifier {
        let timestamp_ms = timestamp_ms & 0xFFFF_FFFF_FFFF;
        let mut state = self.state.lock().expect("generator mutex poisoned");
        let entropy = if timestamp_ms == state.last_timestamp_ms {
            increment_entropy(state.last_entropy)
        } else {
            random_entropy()
        };
        state.last_timestamp_ms = timestamp_ms;
        state.last_entropy = entropy;
        Identifier {
            timestamp_ms,
            entropy,
        }
    }
}

fn random_entropy() -> [u8; 10] {
    let mut buf = [0u8; 10];
    rand::rng().fill_bytes(&mut buf);
    buf
}

fn increment_entropy(mut entropy: [u8; 10]) -> [u8; 10] {
    for byte in entropy.iter_mut().rev() {
        if *byte == 0xFF {
            *byte = 0;
            continue;
        }
        *byte += 1;
        return entropy;
    }
    // Entropy overflowed (exhausted within one millisecond): fall back to
    // fresh randomness rather than wrapping back to zero.
    random_entropy()
}

fn default_generator() -> &'static Generator {
    static DEFAULT: Lazy<Generator> = Lazy::new(Generator::new);
    &DEFAULT
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Error::with_source(ErrorKind::Validation, "invalid utf-8", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = Identifier::generate_at(1_700_000_000_000);
        let encoded = id.to_string();
        assert_eq!(encoded.len(), ENCODED_LEN);
        let parsed = Identifier::parse(&encoded).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.extract_timestamp(), 1_700_000_000_000);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Identifier::parse("TOOSHORT").is_err());
    }

    #[test]
    fn rejects_invalid_character_in_strict_mode() {
        let id = Identifier::generate_at(42);
        let mut s = id.to_string();
        s.replace_range(0..1, "U"); // 'U' is excluded from the alphabet
        assert!(Identifier::parse_with_mode(&s, ValidationMode::Strict).is_err());
    }

    #[test]
    fn standard_mode_accepts_ambiguous_aliases_and_lowercase() {
        let id = Identifier::generate_at(123_456);
        let lower = id.to_string().to_lowercase();
        assert_eq!(Identifier::parse(&lower).unwrap(), id);
    }

    #[test]
    fn same_millisecond_generation_is_monotonic() {
        let gen = Generator::new();
        let a = gen.generate_at(1000);
        let b = gen.generate_at(1000);
        let c = gen.generate_at(1000);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn later_timestamp_always_sorts_after_earlier_one() {
        let gen = Generator::new();
        let a = gen.generate_at(1000);
        let b = gen.generate_at(1001);
        assert!(a < b);
    }

    proptest::proptest! {
        #[test]
        fn parse_of_display_is_identity(ts in 0u64..=0xFFFF_FFFF_FFFFu64) {
            let id = Identifier::generate_at(ts);
            let encoded = id.to_string();
            let parsed = Identifier::parse(&encoded).unwrap();
            proptest::prop_assert_eq!(parsed, id);
        }
    }
}
