//! Passphrase encryption of the payload block for vault archives

use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::archive::{TypeTag, FORMAT_VERSION};
use crate::error::{Result, SedaError};

/// Default SHA-256 stretching rounds for key derivation
pub const KDF_ROUNDS: u32 = 100_000;
/// Largest round count accepted from an archive header
pub const MAX_KDF_ROUNDS: u32 = 16 * KDF_ROUNDS;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Environment variable consulted for the passphrase before prompting
pub const PASSPHRASE_ENV: &str = "SEDA_PASSPHRASE";

/// Key derivation and nonce parameters, stored legibly in the header as
/// `seda-vault: <rounds> <salt> <nonce>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultParams {
    pub rounds: u32,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl VaultParams {
    /// Fresh random salt and nonce
    pub fn generate() -> Self {
        Self {
            rounds: KDF_ROUNDS,
            salt: rand::random(),
            nonce: rand::random(),
        }
    }

    pub fn to_header_value(&self) -> String {
        let b64 = base64::engine::general_purpose::STANDARD;
        format!("{} {} {}", self.rounds, b64.encode(self.salt), b64.encode(self.nonce))
    }

    pub fn parse_header_value(value: &str) -> Result<Self> {
        let bad = || SedaError::corrupt(format!("malformed seda-vault header '{}'", value));
        let b64 = base64::engine::general_purpose::STANDARD;

        let mut parts = value.split_whitespace();
        let rounds = parts.next().and_then(|r| r.parse::<u32>().ok()).ok_or_else(bad)?;
        let salt = parts.next().and_then(|s| b64.decode(s).ok()).ok_or_else(bad)?;
        let nonce = parts.next().and_then(|n| b64.decode(n).ok()).ok_or_else(bad)?;
        if parts.next().is_some() || rounds == 0 || rounds > MAX_KDF_ROUNDS {
            return Err(bad());
        }

        Ok(Self {
            rounds,
            salt: salt.try_into().map_err(|_| bad())?,
            nonce: nonce.try_into().map_err(|_| bad())?,
        })
    }
}

/// Stretch a passphrase into a 32-byte key with salted, iterated SHA-256
pub fn derive_key(passphrase: &str, salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(passphrase.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 1..rounds {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt);
        digest = hasher.finalize();
    }
    digest.into()
}

fn associated_data() -> Vec<u8> {
    format!("seda-format:{};seda-type:{}", FORMAT_VERSION, TypeTag::Vault).into_bytes()
}

/// Encrypt `plaintext` under `passphrase` with the given parameters
pub fn seal(passphrase: &str, params: &VaultParams, plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = derive_key(passphrase, &params.salt, params.rounds);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let aad = associated_data();
    cipher
        .encrypt(
            Nonce::from_slice(&params.nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| SedaError::corrupt("payload encryption failed"))
}

/// Decrypt a vault payload. Any authentication failure is reported as an
/// incorrect passphrase.
pub fn open(passphrase: &str, params: &VaultParams, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let key = derive_key(passphrase, &params.salt, params.rounds);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let aad = associated_data();
    cipher
        .decrypt(
            Nonce::from_slice(&params.nonce),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| SedaError::PassphraseIncorrect {
            kind: TypeTag::Vault,
        })
}
