use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the PKCE verifier string.
pub const DEFAULT_VERIFIER_LEN: usize = 64;
/// Shortest verifier RFC 7636 allows.
pub const MIN_VERIFIER_LEN: usize = 43;
/// Longest verifier RFC 7636 allows.
pub const MAX_VERIFIER_LEN: usize = 128;

const STATE_ENTROPY_BYTES: usize = 32;

/// RFC 3986 unreserved characters.
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PkceError {
    #[error("code verifier length {0} outside {MIN_VERIFIER_LEN}..={MAX_VERIFIER_LEN}")]
    InvalidLength(usize),
}

/// Represents a generated PKCE verifier/challenge pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a PKCE pair using the thread-local CSPRNG.
    pub fn generate() -> Self {
        let verifier = sample_verifier(DEFAULT_VERIFIER_LEN, &mut rand::rng());
        let challenge = generate_code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Generate a PKCE pair using the provided RNG.
    pub fn generate_with_rng<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Result<Self, PkceError> {
        let verifier = verifier_from_rng(len, rng)?;
        let challenge = generate_code_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}

/// Random code verifier of [`DEFAULT_VERIFIER_LEN`] unreserved characters.
pub fn generate_code_verifier() -> String {
    PkcePair::generate().verifier
}

/// Random code verifier with a caller-chosen length.
pub fn generate_code_verifier_with_len(len: usize) -> Result<String, PkceError> {
    let mut rng = rand::rng();
    verifier_from_rng(len, &mut rng)
}

/// Compute the S256 challenge for an arbitrary verifier.
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// CSRF binding token, unrelated to the verifier.
pub fn generate_state() -> String {
    let mut entropy = [0u8; STATE_ENTROPY_BYTES];
    rand::rng().fill(&mut entropy);
    URL_SAFE_NO_PAD.encode(entropy)
}

fn verifier_from_rng<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Result<String, PkceError> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(PkceError::InvalidLength(len));
    }
    Ok(sample_verifier(len, rng))
}

fn sample_verifier<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    (0..len)
        .map(|_| UNRESERVED[rng.random_range(0..UNRESERVED.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_unreserved(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
    }

    #[test]
    fn verifier_has_valid_charset() {
        for _ in 0..32 {
            let verifier = generate_code_verifier();
            assert_eq!(verifier.len(), DEFAULT_VERIFIER_LEN);
            assert!(verifier.chars().all(is_unreserved));
        }
    }

    #[test]
    fn verifier_length_bounds() {
        assert_eq!(generate_code_verifier_with_len(43).unwrap().len(), 43);
        assert_eq!(generate_code_verifier_with_len(128).unwrap().len(), 128);
        assert_eq!(
            generate_code_verifier_with_len(42),
            Err(PkceError::InvalidLength(42))
        );
        assert_eq!(
            generate_code_verifier_with_len(129),
            Err(PkceError::InvalidLength(129))
        );
    }

    #[test]
    fn challenge_matches_reference() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let expected = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert_eq!(generate_code_challenge(verifier), expected);
    }

    #[test]
    fn challenge_is_deterministic_base64url() {
        let verifier = generate_code_verifier();
        let first = generate_code_challenge(&verifier);
        let second = generate_code_challenge(&verifier);
        assert_eq!(first, second);
        assert!(!first.contains(['+', '/', '=']));
    }

    #[test]
    fn state_is_independent_and_long_enough() {
        let state = generate_state();
        // 32 bytes -> 43 base64url chars
        assert_eq!(state.len(), 43);
        assert_ne!(state, generate_state());
        assert!(!state.contains(['+', '/', '=']));
    }

    #[test]
    fn pair_challenge_matches_verifier() {
        let pair = PkcePair::generate();
        assert_eq!(pair.challenge, generate_code_challenge(&pair.verifier));
    }
}
