//! Credential resolution for connection settings.
//!
//! Passwords and tokens in the settings document may come from one of
//! several sources, checked in priority order:
//!
//! 1. **Encrypted value** - `passwordEncrypted`, decrypted with the key in `EDIGATE_SETTINGS_KEY`
//! 2. **Direct value** - `password: "..."`, handy for local testing
//! 3. **File reference** - `passwordFile: /run/secrets/erp_password`
//! 4. **Env var reference** - `passwordEnvVar: ERP_PASSWORD`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: encrypted value, direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// The set of places a single credential may be read from.
///
/// Flattened into the settings sections, so a section can say
/// `passwordEnvVar: ERP_PASSWORD` next to its other keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_encrypted: Option<String>,
}

impl SecretSource {
    /// A source holding a plain value. Mostly useful in tests.
    pub fn direct(value: impl Into<String>) -> Self {
        Self {
            password: Some(value.into()),
            ..Default::default()
        }
    }

    /// Resolves the secret, failing if nothing is configured.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(ciphertext) = self.password_encrypted.as_deref() {
            if !ciphertext.is_empty() {
                let plaintext = SettingsEncryptor::from_env()?.decrypt(ciphertext)?;
                return Ok(SecretString::from(plaintext));
            }
        }
        resolve_secret(
            self.password.as_deref(),
            self.password_file.as_deref(),
            self.password_env_var.as_deref(),
        )
    }

    /// Resolves the secret, returning `None` when no source is configured.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether any source is configured at all.
    pub fn is_configured(&self) -> bool {
        self.password_encrypted.as_deref().is_some_and(|s| !s.is_empty())
            || has_secret_source(
                self.password.as_deref(),
                self.password_file.as_deref(),
                self.password_env_var.as_deref(),
            )
    }
}

/// Resolves a secret from a direct value, a file, or an environment
/// variable, in that order.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Checks if at least one plain secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the user's home directory.
///
/// `~user/path` is not supported.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

// ============================================
// Settings password encryption
// ============================================

/// Encryption key environment variable name.
pub const SETTINGS_KEY_ENV_VAR: &str = "EDIGATE_SETTINGS_KEY";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Encrypts and decrypts passwords stored in the settings document.
///
/// The key is a 64-character hex string (32 bytes).
pub struct SettingsEncryptor {
    cipher: Aes256Gcm,
}

impl SettingsEncryptor {
    /// Creates an encryptor from `EDIGATE_SETTINGS_KEY`.
    pub fn from_env() -> Result<Self> {
        let key_hex = std::env::var(SETTINGS_KEY_ENV_VAR).map_err(|_| {
            SecretError::InvalidKey(format!(
                "Environment variable {} not set",
                SETTINGS_KEY_ENV_VAR
            ))
        })?;

        Self::from_hex_key(&key_hex)
    }

    /// Creates an encryptor from a hex-encoded 32-byte key.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex.trim())
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypts plaintext into hex `<12-byte nonce><ciphertext>`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(hex_encode(&combined))
    }

    /// Decrypts a value produced by [`SettingsEncryptor::encrypt`].
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let combined = hex_decode(ciphertext_hex.trim())
            .map_err(|e| SecretError::DecryptionError(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionError(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionError(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid UTF-8: {}", e)))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }
    if !hex.is_ascii() {
        return Err("Hex string must be ASCII".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| {
        SecretError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}
