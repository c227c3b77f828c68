//! API key token format and secret hashing
//!
//! Tokens look like `fbk_live_<keyId>_<secret>`. The key id is public and
//! indexes the stored record; only a PBKDF2 hash of the secret half is
//! persisted. The composed token is returned to the caller exactly once,
//! at creation or rotation.

use pbkdf2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use pbkdf2::Pbkdf2;
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;

pub const TOKEN_PREFIX: &str = "fbk_live_";

const KEY_ID_LEN: usize = 8;
const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secret hashing failed")]
    Hash,
}

/// A freshly minted key: the token is shown once, the hash is stored.
#[derive(Debug, Clone)]
pub struct MintedKey {
    pub key_id: String,
    pub token: String,
    pub key_hash: String,
}

/// Generate a new key id + secret and hash the secret.
pub fn mint() -> Result<MintedKey, KeyError> {
    let key_id = random_hex(KEY_ID_LEN);
    let (token, key_hash) = mint_secret(&key_id)?;
    Ok(MintedKey {
        key_id,
        token,
        key_hash,
    })
}

/// Generate a new secret for an existing key id (rotation).
/// Returns the composed token and the new hash.
pub fn mint_secret(key_id: &str) -> Result<(String, String), KeyError> {
    let secret = random_token(SECRET_LEN);
    let key_hash = hash_secret(&secret)?;
    let token = format!("{TOKEN_PREFIX}{key_id}_{secret}");
    Ok((token, key_hash))
}

/// Split a presented token into (key_id, secret). Returns `None` for
/// anything that does not match the `fbk_live_` shape; the caller treats
/// that the same as an unknown key.
pub fn parse_token(token: &str) -> Option<(&str, &str)> {
    let rest = token.strip_prefix(TOKEN_PREFIX)?;
    let (key_id, secret) = rest.split_once('_')?;
    if key_id.is_empty() || secret.is_empty() {
        return None;
    }
    Some((key_id, secret))
}

/// Hash a secret with PBKDF2-HMAC-SHA256 into a PHC string.
pub fn hash_secret(secret: &str) -> Result<String, KeyError> {
    let salt = SaltString::generate(&mut OsRng);
    Pbkdf2
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| KeyError::Hash)
}

/// Verify a presented secret against a stored PHC string.
/// The comparison inside `verify_password` is constant-time.
pub fn verify_secret(secret: &str, key_hash: &str) -> bool {
    match PasswordHash::new(key_hash) {
        Ok(parsed) => Pbkdf2.verify_password(secret.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// Random alphanumeric string, used for secrets and artifact tokens.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(n as u32, 16).unwrap()
        })
        .collect()
}
