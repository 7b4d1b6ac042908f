//! Reversible credential codec for provider API secrets.
//!
//! Secrets are stored as base64url tokens of `nonce || AES-256-GCM ciphertext`,
//! under a key derived once from the configured service secret via
//! PBKDF2-HMAC-SHA256 with a fixed salt. The GCM tag doubles as the
//! "is this ours" probe: a value is considered encrypted iff it decrypts.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{PipelineError, Result};

const SALT: &[u8] = b"workflow-ctl-salt";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Marker substring present in masked display values.
///
/// An update payload containing it is the client echoing back the masked
/// form, not submitting a new secret.
pub const MASK_MARKER: &str = "****";

/// Mask a secret for display: `prefix****suffix`.
///
/// Values no longer than `prefix_len + suffix_len` are fully redacted so the
/// mask never reveals the whole secret.
pub fn mask_with(value: &str, prefix_len: usize, suffix_len: usize) -> String {
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= prefix_len + suffix_len {
        return "*".repeat(chars.len());
    }
    let prefix: String = chars[..prefix_len].iter().collect();
    let suffix: String = chars[chars.len() - suffix_len..].iter().collect();
    format!("{}{}{}", prefix, MASK_MARKER, suffix)
}

/// Mask with the display defaults (3 leading, 12 trailing characters).
pub fn mask(value: &str) -> String {
    mask_with(value, 3, 12)
}

/// Outcome of applying a client-supplied `api_key` update value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUpdate {
    /// The caller echoed back a masked display value; the stored ciphertext
    /// stays untouched.
    Unchanged,
    /// A new secret: store this ciphertext.
    Set(String),
}

/// Symmetric codec for provider API secrets.
///
/// The derived key is a pure function of the configured secret, so one
/// instance is built at startup and shared for the process lifetime.
pub struct CredentialCodec {
    cipher: Aes256Gcm,
}

impl CredentialCodec {
    /// Derive the AES key from the service secret and build the codec.
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), SALT, PBKDF2_ITERATIONS, &mut key);
        let cipher = Aes256Gcm::new_from_slice(&key).expect("key is always 32 bytes");
        Self { cipher }
    }

    /// Encrypt a secret. `encrypt("") == ""`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| PipelineError::Crypto("encryption failed".into()))?;
        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Decrypt a stored token. `decrypt("") == ""`.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Ok(String::new());
        }
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| PipelineError::Crypto("value is not a credential token".into()))?;
        if raw.len() <= NONCE_LEN {
            return Err(PipelineError::Crypto("credential token too short".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| PipelineError::Crypto("decryption failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| PipelineError::Crypto("decrypted value is not UTF-8".into()))
    }

    /// Whether `value` is a token this codec produced (decryption succeeds).
    ///
    /// Distinguishes a fresh plaintext key submitted by a caller from an
    /// already-encrypted stored value, so secrets are never double-encrypted.
    pub fn is_encrypted(&self, value: &str) -> bool {
        !value.is_empty() && self.decrypt(value).is_ok()
    }

    /// Resolve a client-supplied `api_key` update value.
    ///
    /// A value carrying the mask marker is treated as "unchanged" (the client
    /// echoed the masked display form). Anything else becomes stored
    /// ciphertext, passing through values that are already encrypted.
    pub fn resolve_update(&self, submitted: &str) -> Result<KeyUpdate> {
        if submitted.contains(MASK_MARKER) {
            return Ok(KeyUpdate::Unchanged);
        }
        if self.is_encrypted(submitted) {
            return Ok(KeyUpdate::Set(submitted.to_string()));
        }
        Ok(KeyUpdate::Set(self.encrypt(submitted)?))
    }
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCodec").finish_non_exhaustive()
    }
}
