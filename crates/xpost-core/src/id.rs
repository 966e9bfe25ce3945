//! Random identifiers for envelopes, correlation hashes, tunnels and methods.

use rand::Rng;

/// Generate a random 16-byte hex identifier.
pub fn unique_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}
