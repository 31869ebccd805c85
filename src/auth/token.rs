use rand::{rngs::OsRng, RngCore};

/// Entropy of a single-use token. 20 bytes keeps collisions past the
/// birthday bound for any realistic account count; the store relies on
/// this rather than enforcing uniqueness itself.
const TOKEN_BYTES: usize = 20;

/// Generate an opaque single-use token: hex-encoded CSPRNG bytes, fixed
/// width, compared only for exact equality.
pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
