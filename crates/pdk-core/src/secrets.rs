// Encrypted at-rest secret store.
//
// Secrets live in a single versioned JSON document under the user's PDK
// home. Values are encrypted with a pluggable cipher; the default derives
// a machine-scoped AES-256 key, so documents are not portable between
// machines. Every value disclosed through this store is registered with
// the output masker.

use crate::constants::{pdk_home, SECRETS_FILE};
use crate::error::{codes, PdkError, PdkResult};
use crate::masker::SecretMasker;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroize;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Secret names: shell-identifier shaped.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("secret name regex"));

const DOCUMENT_VERSION: &str = "1.0";
const IV_LEN: usize = 16;

/// Fixed salt mixed into the machine-key derivation.
const KEY_SALT: &str = "pdk-secret-store-v1";

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Encryption strategy for values at rest.
pub trait SecretCipher: Send + Sync {
    /// Tag written into the document's `algorithm` field.
    fn algorithm(&self) -> &'static str;
    fn encrypt(&self, plaintext: &[u8]) -> PdkResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> PdkResult<Vec<u8>>;
}

/// AES-256-CBC with a key derived from stable machine identity.
///
/// The key is `SHA-256(hostname | os | user | salt)`. A random 16-byte IV
/// is prepended to each ciphertext; padding is PKCS#7. Secrets encrypted
/// on one machine do not decrypt on another.
pub struct DerivedKeyCipher {
    key: [u8; 32],
}

impl DerivedKeyCipher {
    pub fn new() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown-host".to_string());
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".to_string());

        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update([0]);
        hasher.update(std::env::consts::OS.as_bytes());
        hasher.update([0]);
        hasher.update(user.as_bytes());
        hasher.update([0]);
        hasher.update(KEY_SALT.as_bytes());
        let digest = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    #[cfg(test)]
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl Default for DerivedKeyCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretCipher for DerivedKeyCipher {
    fn algorithm(&self) -> &'static str {
        "aes-256-cbc"
    }

    fn encrypt(&self, plaintext: &[u8]) -> PdkResult<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new(&self.key.into(), &iv.into());
        let ct = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(IV_LEN + ct.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> PdkResult<Vec<u8>> {
        if ciphertext.len() <= IV_LEN {
            return Err(PdkError::new(
                codes::SECRET_DECRYPTION_FAILED,
                "ciphertext too short",
            ));
        }
        let (iv_bytes, body) = ciphertext.split_at(IV_LEN);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(iv_bytes);

        let cipher = Aes256CbcDec::new(&self.key.into(), &iv.into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| PdkError::new(codes::SECRET_DECRYPTION_FAILED, "decryption failed"))
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// One persisted secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    #[serde(rename = "encryptedValue")]
    pub encrypted_value: String,
    pub algorithm: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretsDocument {
    version: String,
    /// BTreeMap keeps `list` output stable and the document diffable.
    secrets: BTreeMap<String, SecretEntry>,
}

impl Default for SecretsDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            secrets: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The secret store. A single-writer mutex serialises every
/// load→mutate→write cycle; decrypted values are cached and handed to the
/// masker on first disclosure.
pub struct SecretStore {
    path: PathBuf,
    cipher: Box<dyn SecretCipher>,
    masker: Option<Arc<SecretMasker>>,
    /// Guards the read-modify-write cycle on the document.
    write_lock: Mutex<()>,
    /// Decrypted-value cache; concurrent readers short-circuit here.
    cache: dashmap::DashMap<String, String>,
}

impl SecretStore {
    /// Store at the default user-home path with the default cipher.
    pub fn open_default() -> Self {
        Self::new(pdk_home().join(SECRETS_FILE), Box::new(DerivedKeyCipher::new()))
    }

    pub fn new(path: PathBuf, cipher: Box<dyn SecretCipher>) -> Self {
        Self {
            path,
            cipher,
            masker: None,
            write_lock: Mutex::new(()),
            cache: dashmap::DashMap::new(),
        }
    }

    pub fn with_masker(mut self, masker: Arc<SecretMasker>) -> Self {
        self.masker = Some(masker);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decrypt and return one secret. The value is registered with the
    /// masker before it is returned.
    pub fn get(&self, name: &str) -> PdkResult<Option<String>> {
        validate_name(name)?;

        if let Some(cached) = self.cache.get(name) {
            return Ok(Some(cached.clone()));
        }

        let doc = self.load()?;
        let Some(entry) = doc.secrets.get(name) else {
            return Ok(None);
        };

        let value = self.decrypt_entry(name, entry)?;
        self.disclose(name, &value);
        Ok(Some(value))
    }

    /// Encrypt and persist one secret, creating or updating the entry.
    pub fn set(&self, name: &str, value: &str) -> PdkResult<()> {
        validate_name(name)?;

        let _guard = self.write_lock.lock();
        let mut doc = self.load()?;

        let mut plaintext = value.as_bytes().to_vec();
        let encrypted = self.cipher.encrypt(&plaintext);
        plaintext.zeroize();
        let encrypted = encrypted?;

        let now = Utc::now();
        let created_at = doc
            .secrets
            .get(name)
            .map(|e| e.created_at)
            .unwrap_or(now);

        doc.secrets.insert(
            name.to_string(),
            SecretEntry {
                encrypted_value: BASE64.encode(&encrypted),
                algorithm: self.cipher.algorithm().to_string(),
                created_at,
                updated_at: now,
            },
        );

        self.save(&doc)?;
        self.disclose(name, value);
        Ok(())
    }

    /// Remove a secret. Returns true when an entry existed.
    pub fn delete(&self, name: &str) -> PdkResult<bool> {
        validate_name(name)?;

        let _guard = self.write_lock.lock();
        let mut doc = self.load()?;
        let existed = doc.secrets.remove(name).is_some();
        if existed {
            self.save(&doc)?;
        }
        self.cache.remove(name);
        Ok(existed)
    }

    pub fn exists(&self, name: &str) -> PdkResult<bool> {
        validate_name(name)?;
        if self.cache.contains_key(name) {
            return Ok(true);
        }
        Ok(self.load()?.secrets.contains_key(name))
    }

    /// Secret names in stable (lexicographic) order.
    pub fn list(&self) -> PdkResult<Vec<String>> {
        Ok(self.load()?.secrets.keys().cloned().collect())
    }

    /// Decrypt every secret. All values are registered with the masker.
    pub fn get_all(&self) -> PdkResult<HashMap<String, String>> {
        let doc = self.load()?;
        let mut out = HashMap::with_capacity(doc.secrets.len());
        for (name, entry) in &doc.secrets {
            let value = match self.cache.get(name) {
                Some(cached) => cached.clone(),
                None => {
                    let v = self.decrypt_entry(name, entry)?;
                    self.disclose(name, &v);
                    v
                }
            };
            out.insert(name.clone(), value);
        }
        Ok(out)
    }

    fn decrypt_entry(&self, name: &str, entry: &SecretEntry) -> PdkResult<String> {
        let ciphertext = BASE64
            .decode(&entry.encrypted_value)
            .map_err(|_| PdkError::secret_decryption_failed(name))?;
        let mut plaintext = self
            .cipher
            .decrypt(&ciphertext)
            .map_err(|_| PdkError::secret_decryption_failed(name))?;
        match String::from_utf8(std::mem::take(&mut plaintext)) {
            Ok(s) => Ok(s),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                Err(PdkError::secret_decryption_failed(name))
            }
        }
    }

    /// Cache a decrypted value and register it with the masker.
    fn disclose(&self, name: &str, value: &str) {
        if let Some(ref masker) = self.masker {
            masker.register(value);
        }
        self.cache.insert(name.to_string(), value.to_string());
    }

    fn load(&self) -> PdkResult<SecretsDocument> {
        if !self.path.exists() {
            return Ok(SecretsDocument::default());
        }
        let text = fs::read_to_string(&self.path).map_err(|e| {
            PdkError::new(
                codes::SECRET_STORE_IO,
                format!("failed to read {}: {e}", self.path.display()),
            )
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PdkError::new(
                codes::SECRET_STORE_IO,
                format!("secret store is corrupt ({e})"),
            )
            .with_suggestion(format!(
                "Remove {} to start over (existing secrets will be lost)",
                self.path.display()
            ))
        })
    }

    fn save(&self, doc: &SecretsDocument) -> PdkResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PdkError::new(
                    codes::SECRET_STORE_IO,
                    format!("failed to create {}: {e}", parent.display()),
                )
            })?;
        }
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| PdkError::new(codes::SECRET_STORE_IO, e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| {
            PdkError::new(
                codes::SECRET_STORE_IO,
                format!("failed to write {}: {e}", self.path.display()),
            )
        })?;

        // Owner-only on POSIX; Windows relies on filesystem ACLs.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        Ok(())
    }
}

fn validate_name(name: &str) -> PdkResult<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(PdkError::new(
            codes::SECRET_INVALID_NAME,
            format!("invalid secret name '{name}'"),
        )
        .with_suggestion("Secret names must match [A-Za-z_][A-Za-z0-9_]*"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SecretStore {
        SecretStore::new(
            dir.path().join("secrets.json"),
            Box::new(DerivedKeyCipher::with_key([7u8; 32])),
        )
    }

    #[test]
    fn test_set_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.set("API_KEY", "abc-123-xyz").unwrap();
        assert_eq!(s.get("API_KEY").unwrap().as_deref(), Some("abc-123-xyz"));
    }

    #[test]
    fn test_overwrite_returns_latest() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.set("K", "v1").unwrap();
        s.set("K", "v2").unwrap();
        assert_eq!(s.get("K").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let s = store(&dir);
            s.set("PERSIST", "still-here").unwrap();
        }
        let s2 = store(&dir);
        assert_eq!(s2.get("PERSIST").unwrap().as_deref(), Some("still-here"));
    }

    #[test]
    fn test_ciphertext_does_not_contain_plaintext() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.set("LEAKY", "super-secret-value").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("secrets.json")).unwrap();
        assert!(!raw.contains("super-secret-value"));
        assert!(raw.contains("encryptedValue"));
        assert!(raw.contains("\"version\": \"1.0\""));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.set("GONE", "x").unwrap();
        assert!(s.delete("GONE").unwrap());
        assert!(!s.delete("GONE").unwrap());
        assert_eq!(s.get("GONE").unwrap(), None);
    }

    #[test]
    fn test_list_is_sorted() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.set("ZEBRA", "1").unwrap();
        s.set("ALPHA", "2").unwrap();
        assert_eq!(s.list().unwrap(), vec!["ALPHA".to_string(), "ZEBRA".to_string()]);
    }

    #[test]
    fn test_invalid_name_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(s.set("bad name", "x").is_err());
        assert!(s.set("1leading", "x").is_err());
        assert!(s.set("ok_name", "x").is_ok());
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let dir = TempDir::new().unwrap();
        {
            let s = store(&dir);
            s.set("LOCKED", "value").unwrap();
        }
        let other = SecretStore::new(
            dir.path().join("secrets.json"),
            Box::new(DerivedKeyCipher::with_key([9u8; 32])),
        );
        let err = other.get("LOCKED").unwrap_err();
        assert_eq!(err.code, codes::SECRET_DECRYPTION_FAILED);
        assert!(!err.suggestions.is_empty());
    }

    #[test]
    fn test_get_registers_with_masker() {
        let dir = TempDir::new().unwrap();
        let masker = Arc::new(SecretMasker::new());
        let s = store(&dir).with_masker(masker.clone());
        s.set("TOKEN", "tok-value").unwrap();
        s.get("TOKEN").unwrap();
        assert_eq!(masker.mask("echo tok-value"), "echo ***");
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.set("PERM", "x").unwrap();
        let mode = std::fs::metadata(dir.path().join("secrets.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_cipher_iv_is_random() {
        let cipher = DerivedKeyCipher::with_key([1u8; 32]);
        let a = cipher.encrypt(b"same input").unwrap();
        let b = cipher.encrypt(b"same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), b"same input");
        assert_eq!(cipher.decrypt(&b).unwrap(), b"same input");
    }
}
