//! Encrypted fragment support.
//!
//! Encrypted fragments are [ejson](https://github.com/Shopify/ejson)
//! documents: JSON carrying a `_public_key` field with the hex X25519 public
//! key of the recipient. Every string value is sealed as
//! `EJ[1:<encrypter public key>:<nonce>:<box>]` (base64 parts, NaCl box with
//! X25519 and XSalsa20-Poly1305); values under keys starting with `_` are
//! never encrypted.
//!
//! The private key (64 hex characters) is taken, in priority order, from:
//!
//! 1. **Direct value** - `private_key` in the settings
//! 2. **File reference** - `private_key_file`
//! 3. **Env var reference** - `private_key_env`
//! 4. **Key directory** - `<key_dir>/<_public_key>`

use std::fs;
use std::path::{Path, PathBuf};

use crypto_box::aead::{Aead, Nonce};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::config::EjsonSettings;

/// Error type for secret resolution and fragment decryption failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
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

    #[error("No private key for public key '{public_key}' at '{path}': {source}")]
    KeyNotFound {
        public_key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encrypted document has no '{}' field", PUBLIC_KEY_FIELD)]
    MissingPublicKey,

    #[error("Invalid public key identifier '{0}'")]
    InvalidPublicKey(String),

    #[error("Invalid encrypted document: {0}")]
    InvalidDocument(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Result type for secret operations.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Decrypts an encrypted fragment into plaintext bytes.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8], key_dir: &Path) -> Result<Vec<u8>>;
}

/// Resolves a secret from multiple sources in priority order:
/// 1. Direct value (if provided and non-empty)
/// 2. File contents (if path provided)
/// 3. Environment variable (if name provided)
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    // Priority 1: Direct value
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    // Priority 2: File
    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            match fs::read_to_string(&expanded) {
                Ok(content) => return Ok(SecretString::from(content.trim().to_string())),
                Err(e) => {
                    return Err(SecretError::FileReadError {
                        path: expanded,
                        source: e,
                    })
                }
            }
        }
    }

    // Priority 3: Environment variable
    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            match std::env::var(var_name) {
                Ok(value) => return Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => {
                    return Err(SecretError::EnvVarNotSet {
                        name: var_name.to_string(),
                    })
                }
                Err(std::env::VarError::NotUnicode(_)) => {
                    return Err(SecretError::EnvVarNotUnicode {
                        name: var_name.to_string(),
                    })
                }
            }
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Resolves a secret, returning None if no source is provided instead of an error.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands `~` to the user's home directory.
///
/// Handles both `~/path` and standalone `~`; `~user/path` is left as is.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

// ============================================
// Document encryption
// ============================================

/// Field naming the key an encrypted document was sealed for.
pub const PUBLIC_KEY_FIELD: &str = "_public_key";

const BOX_PREFIX: &str = "EJ[1:";
const BOX_SUFFIX: &str = "]";

/// XSalsa20 nonce size (192 bits = 24 bytes).
const NONCE_SIZE: usize = 24;

/// X25519 key size, public and private.
const KEY_SIZE: usize = 32;

/// An ejson keypair. Decrypts values sealed for its public key.
pub struct EjsonCipher {
    secret: SecretKey,
    public: PublicKey,
}

impl std::fmt::Debug for EjsonCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EjsonCipher")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl EjsonCipher {
    /// Creates a cipher from a 64-character hex private key (surrounding
    /// whitespace is ignored, key files usually end with a newline).
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let secret = SecretKey::from(decode_key(key_hex)?);
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Generates a fresh keypair.
    pub fn generate() -> Result<Self> {
        let secret = SecretKey::from(rand_bytes::<KEY_SIZE>()?);
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Hex public key, the value of `_public_key` and the key file name.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Hex private key, the content of the key file.
    pub fn private_key_hex(&self) -> SecretString {
        SecretString::from(hex::encode(self.secret.to_bytes()))
    }

    pub fn decrypt_value(&self, boxed: &str) -> Result<String> {
        let message = BoxedMessage::parse(boxed)?;
        let salsa = SalsaBox::new(&message.encrypter, &self.secret);

        let plaintext_bytes = salsa
            .decrypt(Nonce::<SalsaBox>::from_slice(&message.nonce), message.sealed.as_slice())
            .map_err(|_| {
                SecretError::DecryptionError("Message authentication failed".to_string())
            })?;

        String::from_utf8(plaintext_bytes)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid UTF-8: {}", e)))
    }

    pub fn decrypt_document(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut document = parse_document(ciphertext)?;
        walk_strings(&mut document, &mut |s| {
            if is_boxed(s) {
                self.decrypt_value(s).map(Some)
            } else {
                Ok(None)
            }
        })?;
        serialize_document(&document)
    }
}

/// Seals values for one recipient with a single ephemeral keypair.
pub struct EjsonEncrypter {
    ephemeral: PublicKey,
    salsa: SalsaBox,
}

impl EjsonEncrypter {
    /// Creates an encrypter for the hex public key of the recipient.
    pub fn new(recipient_hex: &str) -> Result<Self> {
        let recipient = PublicKey::from(decode_key(recipient_hex)?);
        let ephemeral_secret = SecretKey::from(rand_bytes::<KEY_SIZE>()?);
        Ok(Self {
            ephemeral: ephemeral_secret.public_key(),
            salsa: SalsaBox::new(&recipient, &ephemeral_secret),
        })
    }

    /// Seals one value as `EJ[1:<pk>:<nonce>:<box>]` with a fresh nonce.
    pub fn encrypt_value(&self, plaintext: &str) -> Result<String> {
        let nonce = rand_bytes::<NONCE_SIZE>()?;

        let sealed = self
            .salsa
            .encrypt(Nonce::<SalsaBox>::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SecretError::EncryptionError("Failed to seal value".to_string()))?;

        Ok(format!(
            "{}{}:{}:{}{}",
            BOX_PREFIX,
            BASE64.encode(self.ephemeral.as_bytes()),
            BASE64.encode(nonce),
            BASE64.encode(sealed),
            BOX_SUFFIX
        ))
    }
}

/// Encrypts every plain string value of a JSON document for the key named
/// by its `_public_key` field. Values that are already sealed are left
/// alone, so re-encrypting is idempotent.
pub fn encrypt_document(plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut document = parse_document(plaintext)?;
    let encrypter = EjsonEncrypter::new(public_key_of(&document)?)?;

    walk_strings(&mut document, &mut |s| {
        if is_boxed(s) {
            Ok(None)
        } else {
            encrypter.encrypt_value(s).map(Some)
        }
    })?;
    serialize_document(&document)
}

/// The parts of an `EJ[1:...]` value.
struct BoxedMessage {
    encrypter: PublicKey,
    nonce: [u8; NONCE_SIZE],
    sealed: Vec<u8>,
}

impl BoxedMessage {
    fn parse(boxed: &str) -> Result<Self> {
        let invalid = |reason: &str| SecretError::DecryptionError(reason.to_string());

        let body = boxed
            .strip_prefix(BOX_PREFIX)
            .and_then(|rest| rest.strip_suffix(BOX_SUFFIX))
            .ok_or_else(|| invalid("Not an encrypted value"))?;

        let parts: Vec<&str> = body.split(':').collect();
        let &[encrypter, nonce, sealed] = parts.as_slice() else {
            return Err(invalid("Expected 'EJ[1:<public key>:<nonce>:<box>]'"));
        };

        let decode = |part: &str| {
            BASE64
                .decode(part)
                .map_err(|e| SecretError::DecryptionError(format!("Invalid base64: {}", e)))
        };

        let encrypter: [u8; KEY_SIZE] = decode(encrypter)?
            .try_into()
            .map_err(|_| invalid("Encrypter public key must be 32 bytes"))?;
        let nonce: [u8; NONCE_SIZE] = decode(nonce)?
            .try_into()
            .map_err(|_| invalid("Nonce must be 24 bytes"))?;

        Ok(Self {
            encrypter: PublicKey::from(encrypter),
            nonce,
            sealed: decode(sealed)?,
        })
    }
}

fn is_boxed(value: &str) -> bool {
    value.starts_with(BOX_PREFIX) && value.ends_with(BOX_SUFFIX)
}

fn decode_key(key_hex: &str) -> Result<[u8; KEY_SIZE]> {
    let key_bytes = hex::decode(key_hex.trim())
        .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

    key_bytes.try_into().map_err(|bytes: Vec<u8>| {
        SecretError::InvalidKey(format!(
            "Key must be {} bytes ({} hex chars), got {} bytes",
            KEY_SIZE,
            KEY_SIZE * 2,
            bytes.len()
        ))
    })
}

fn public_key_of(document: &Value) -> Result<&str> {
    document
        .get(PUBLIC_KEY_FIELD)
        .and_then(Value::as_str)
        .ok_or(SecretError::MissingPublicKey)
}

fn parse_document(bytes: &[u8]) -> Result<Value> {
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|e| SecretError::InvalidDocument(format!("Invalid JSON: {}", e)))?;
    if !document.is_object() {
        return Err(SecretError::InvalidDocument(
            "Top level must be an object".to_string(),
        ));
    }
    Ok(document)
}

fn serialize_document(document: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(document)
        .map_err(|e| SecretError::InvalidDocument(format!("Failed to serialize: {}", e)))
}

/// Visits string leaves, skipping everything below `_`-prefixed keys.
/// The callback returns a replacement or `None` to keep the value.
fn walk_strings<F>(value: &mut Value, f: &mut F) -> Result<()>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    match value {
        Value::String(s) => {
            if let Some(replacement) = f(s)? {
                *s = replacement;
            }
        }
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key.starts_with('_') {
                    continue;
                }
                walk_strings(child, f)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_strings(item, f)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Generates random bytes using getrandom.
fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| {
        SecretError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}

// ============================================
// Key directory decryptor
// ============================================

/// Default [`SecretDecryptor`]: looks the private key up in the key
/// directory unless one was configured explicitly.
#[derive(Default)]
pub struct KeyDirDecryptor {
    private_key: Option<SecretString>,
}

impl std::fmt::Debug for KeyDirDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDirDecryptor")
            .field("explicit_key", &self.private_key.is_some())
            .finish()
    }
}

impl KeyDirDecryptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_private_key(private_key: SecretString) -> Self {
        Self {
            private_key: Some(private_key),
        }
    }

    pub fn from_settings(settings: &EjsonSettings) -> Result<Self> {
        let private_key = resolve_secret_optional(
            settings.private_key.as_deref(),
            settings.private_key_file.as_deref(),
            settings.private_key_env.as_deref(),
        )?;
        Ok(Self { private_key })
    }

    fn cipher_for(&self, public_key: &str, key_dir: &Path) -> Result<EjsonCipher> {
        if let Some(key) = &self.private_key {
            return EjsonCipher::from_hex_key(key.expose_secret());
        }

        if public_key.is_empty()
            || public_key == "."
            || public_key == ".."
            || public_key.contains(['/', '\\'])
        {
            return Err(SecretError::InvalidPublicKey(public_key.to_string()));
        }

        let key_dir = PathBuf::from(expand_home(&key_dir.to_string_lossy()));
        let path = key_dir.join(public_key);
        let content = fs::read_to_string(&path).map_err(|e| SecretError::KeyNotFound {
            public_key: public_key.to_string(),
            path: path.clone(),
            source: e,
        })?;

        let key = SecretString::from(content.trim().to_string());
        EjsonCipher::from_hex_key(key.expose_secret())
    }
}

impl SecretDecryptor for KeyDirDecryptor {
    fn decrypt(&self, ciphertext: &[u8], key_dir: &Path) -> Result<Vec<u8>> {
        let document = parse_document(ciphertext)?;
        self.cipher_for(public_key_of(&document)?, key_dir)?
            .decrypt_document(ciphertext)
    }
}
