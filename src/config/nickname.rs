//! Anonymous login nickname generator.
//!
//! Twitch chat accepts `justinfan` followed by digits as a read-only login
//! that needs no token.

use rand::RngExt;

const ANONYMOUS_PREFIX: &str = "justinfan";

/// Generate a nickname like `justinfan48213`.
pub fn generate_anonymous_nickname() -> String {
    let mut rng = rand::rng();
    let num: u32 = rng.random_range(10_000..100_000);
    format!("{}{}", ANONYMOUS_PREFIX, num)
}
