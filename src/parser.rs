//! # Parser
//!
//! Turns raw `.env` content plus an optional decryption key into a flat
//! key/value mapping.
//!
//! ## Format
//!
//! Content is standard `.env` syntax, parsed in memory with `dotenvy`
//! (quoting, comments and `export` prefixes follow `dotenvy`). Values are
//! taken literally: `$NAME` and `${NAME}` are never expanded, neither from
//! earlier keys nor from the controller's own environment. Any value of the
//! form `encrypted:<base64>` is an AES-256-GCM ciphertext:
//!
//! - the base64 payload is a 12-byte nonce followed by the ciphertext and tag
//! - the AES key is the SHA-256 digest of the decryption key string
//!
//! Plain values pass through untouched, so unencrypted content parses with
//! or without a key. An encrypted value without a key fails the whole parse.
//!
//! **SECURITY**: decrypted content exists only in process memory, nothing is
//! written to disk.

use crate::constants::ENCRYPTED_VALUE_PREFIX;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-256-GCM.
const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed .env content: {0}")]
    Malformed(String),
    #[error("value '{name}' is encrypted but no decryption key was provided")]
    KeyRequired { name: String },
    #[error("invalid decryption key: {0}")]
    InvalidKey(String),
    #[error("failed to decrypt value '{name}': {reason}")]
    Decrypt { name: String, reason: String },
    #[error("encryption failed: {0}")]
    Encrypt(String),
}

/// Parses (and decrypts) `.env` content
pub trait EnvParser: Send + Sync {
    fn parse(&self, content: &str, key: Option<&str>) -> Result<BTreeMap<String, String>, ParseError>;
}

/// The production parser: `dotenvy` syntax with `encrypted:` values
#[derive(Debug, Default, Clone, Copy)]
pub struct DotenvParser;

impl EnvParser for DotenvParser {
    fn parse(&self, content: &str, key: Option<&str>) -> Result<BTreeMap<String, String>, ParseError> {
        let cipher = key.map(ValueCipher::new).transpose()?;
        let content = escape_substitutions(content);
        let mut values = BTreeMap::new();

        for item in dotenvy::from_read_iter(content.as_bytes()) {
            let (name, value) = item.map_err(|e| ParseError::Malformed(e.to_string()))?;
            let value = match value.strip_prefix(ENCRYPTED_VALUE_PREFIX) {
                Some(payload) => {
                    let cipher = cipher
                        .as_ref()
                        .ok_or_else(|| ParseError::KeyRequired { name: name.clone() })?;
                    cipher
                        .decrypt(payload)
                        .map_err(|reason| ParseError::Decrypt {
                            name: name.clone(),
                            reason,
                        })?
                }
                None => value,
            };
            values.insert(name, value);
        }

        Ok(values)
    }
}

/// AES-256-GCM cipher for individual `.env` values
pub struct ValueCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for ValueCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCipher").finish_non_exhaustive()
    }
}

impl ValueCipher {
    /// Derive the cipher from a decryption key string
    pub fn new(key: &str) -> Result<Self, ParseError> {
        if key.trim().is_empty() {
            return Err(ParseError::InvalidKey("key is empty".to_string()));
        }
        let digest = Sha256::digest(key.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest)
            .map_err(|e| ParseError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext value into its `encrypted:<base64>` form
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ParseError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ParseError::Encrypt(e.to_string()))?;

        let mut combined = nonce.to_vec();
        combined.extend(ciphertext);

        Ok(format!("{ENCRYPTED_VALUE_PREFIX}{}", STANDARD.encode(combined)))
    }

    /// Decrypt the base64 payload of an `encrypted:` value
    fn decrypt(&self, payload: &str) -> Result<String, String> {
        let combined = STANDARD
            .decode(payload.trim())
            .map_err(|e| format!("invalid base64: {e}"))?;

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err("ciphertext too short".to_string());
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| "authentication failed (wrong key or corrupted value)".to_string())?;

        String::from_utf8(plaintext).map_err(|e| format!("plaintext is not UTF-8: {e}"))
    }
}

/// Encrypt every value of `.env` content, producing content `DotenvParser` decrypts
///
/// Values that are already encrypted are kept as they are. Comments and
/// blank lines are dropped; keys keep their original order.
pub fn encrypt_env(content: &str, key: &str) -> Result<String, ParseError> {
    let cipher = ValueCipher::new(key)?;
    let content = escape_substitutions(content);
    let mut output = String::new();

    for item in dotenvy::from_read_iter(content.as_bytes()) {
        let (name, value) = item.map_err(|e| ParseError::Malformed(e.to_string()))?;
        let value = if value.starts_with(ENCRYPTED_VALUE_PREFIX) {
            value
        } else {
            cipher.encrypt(&value)?
        };
        output.push_str(&name);
        output.push('=');
        output.push_str(&value);
        output.push('\n');
    }

    Ok(output)
}

/// Where the scan is relative to `dotenvy`'s quoting rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quoting {
    Unquoted,
    Escape,
    Strong,
    Weak,
    WeakEscape,
    Comment,
}

/// Escape every `$` that `dotenvy` would expand as a variable reference
///
/// `dotenvy` substitutes unquoted and double-quoted `$NAME` from the process
/// environment first, which would copy the controller's own environment into
/// generated Secrets. Single-quoted text, already escaped characters and
/// comments are left alone.
fn escape_substitutions(content: &str) -> Cow<'_, str> {
    if !content.contains('$') {
        return Cow::Borrowed(content);
    }

    let mut escaped = String::with_capacity(content.len() + 16);
    let mut state = Quoting::Unquoted;
    // `#` only opens a comment at line start or after whitespace
    let mut blank_before = true;

    for c in content.chars() {
        let next = match (state, c) {
            (Quoting::Comment, '\n') => Quoting::Unquoted,
            (Quoting::Comment, _) => Quoting::Comment,
            (Quoting::Escape, _) => Quoting::Unquoted,
            (Quoting::WeakEscape, _) => Quoting::Weak,
            (Quoting::Strong, '\'') => Quoting::Unquoted,
            (Quoting::Strong, _) => Quoting::Strong,
            (Quoting::Weak, '"') => Quoting::Unquoted,
            (Quoting::Weak, '\\') => Quoting::WeakEscape,
            (Quoting::Weak, _) => Quoting::Weak,
            (Quoting::Unquoted, '#') if blank_before => Quoting::Comment,
            (Quoting::Unquoted, '\\') => Quoting::Escape,
            (Quoting::Unquoted, '\'') => Quoting::Strong,
            (Quoting::Unquoted, '"') => Quoting::Weak,
            (Quoting::Unquoted, _) => Quoting::Unquoted,
        };
        if c == '$' && matches!(state, Quoting::Unquoted | Quoting::Weak) {
            escaped.push('\\');
        }
        escaped.push(c);
        blank_before = state == Quoting::Unquoted && c.is_whitespace();
        state = next;
    }

    Cow::Owned(escaped)
}
