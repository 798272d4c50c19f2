//! Human-readable document codes (`APT-…` for reservations, `VTA-…` for sales).

use chrono::Utc;
use rand::Rng;

pub const RESERVATION_PREFIX: &str = "APT";
pub const SALE_PREFIX: &str = "VTA";

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RANDOM_SUFFIX_LEN: usize = 5;

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    digits.iter().rev().collect()
}

/// `PREFIX-<base36 millis><5 random base36 chars>`, uppercase.
///
/// The `code` columns carry a unique index.
pub fn generate(prefix: &str) -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RANDOM_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{}{}", prefix, to_base36(millis), suffix)
}

pub fn reservation_code() -> String {
    generate(RESERVATION_PREFIX)
}

pub fn sale_code() -> String {
    generate(SALE_PREFIX)
}
