//! Shared secrets that users must present verbatim.
//!
//! Comparisons go through an HMAC under a per-process random key, so checking
//! a guess takes the same time however many leading bytes are correct, and
//! regardless of the length of either value.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of the vote access code.
pub const VOTE_CODE_LENGTH: usize = 4;

/// Constant-time matcher for a single secret value.
#[derive(Clone)]
pub struct SecretMatcher {
    key: [u8; 32],
    digest: Vec<u8>,
}

impl SecretMatcher {
    pub fn new<T: AsRef<[u8]>>(secret: T) -> Self {
        let key: [u8; 32] = rand::random();
        let digest = Self::mac(&key, secret.as_ref()).finalize().into_bytes().to_vec();
        Self { key, digest }
    }

    /// Does the supplied value equal the secret?
    pub fn matches<T: AsRef<[u8]>>(&self, supplied: T) -> bool {
        Self::mac(&self.key, supplied.as_ref())
            .verify_slice(&self.digest)
            .is_ok()
    }

    fn mac(key: &[u8], data: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(data);
        mac
    }
}

/// The short code voters must supply alongside their token. It is distributed
/// out of band (read out in the room) and changes every time the server starts.
#[derive(Clone)]
pub struct VoteCode {
    code: String,
    matcher: SecretMatcher,
}

impl VoteCode {
    /// Generate a fresh code of uppercase letters.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..VOTE_CODE_LENGTH)
            .map(|_| char::from(rng.gen_range(b'A'..=b'Z')))
            .collect::<String>();
        Self::new(code)
    }

    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        let matcher = SecretMatcher::new(&code);
        Self { code, matcher }
    }

    /// The code itself, for distribution to voters.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Check a code supplied by a voter.
    pub fn check(&self, supplied: &str) -> bool {
        self.matcher.matches(supplied)
    }
}

/// The configured admin password, held only as a matcher.
#[derive(Clone)]
pub struct AdminPassword(SecretMatcher);

impl AdminPassword {
    pub fn new(password: &str) -> Self {
        Self(SecretMatcher::new(password))
    }

    pub fn check(&self, supplied: &str) -> bool {
        self.0.matches(supplied)
    }
}
