//! # Utility Functions
//!
//! Small helpers shared by the demonstration binary and the integration
//! tests: collision-free queue names and printable test payloads.

use rand::Rng;
use uuid::Uuid;

/// Generate a queue name that will not collide with other runs
///
/// The result is `/<prefix>_<uuid>` with the UUID in simple (hyphen-free)
/// form, well inside the 255-byte name limit for any sensible prefix.
///
/// ```rust
/// # use posix_mq::utils::unique_queue_name;
/// let name = unique_queue_name("pmqtest");
/// assert!(name.starts_with("/pmqtest_"));
/// ```
pub fn unique_queue_name(prefix: &str) -> String {
    format!("/{}_{}", prefix, Uuid::new_v4().simple())
}

/// A random printable, non-space ASCII byte (`!` through `~`)
pub fn random_printable<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.gen_range(b'!'..=b'~')
}
