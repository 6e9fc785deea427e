//! Sealed-key envelope cipher.
//!
//! `EnvelopeCipher` is the seam the codec talks to: encrypt under a remote
//! public key, unseal a key with a local session, decrypt with that key.
//! `SealedBoxCipher` implements it with ring AES-256-GCM and X25519:
//!
//!   encryptedKey  = base64(ephemeral_pub[32] || AES-GCM(kek, zero nonce, K) )
//!   encryptedData = base64(AES-GCM(K, iv, plaintext) with appended tag)
//!   kek           = HKDF-SHA256(salt = ephemeral_pub || remote_pub, ikm = DH)
//!
//! The kek is unique per ephemeral key, so the fixed nonce is used once.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use shockwire_protocol::Envelope;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::keyring::{decode_key, Keyring};
use crate::CryptoError;

const KEY_LENGTH: usize = 32;
const PUBLIC_KEY_LENGTH: usize = 32;
const SEAL_INFO: &[u8] = b"shockwire/sealed-key/v1";

/// Per-message symmetric key. Zeroed on drop, never printed.
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    fn aead(&self) -> Result<LessSafeKey, CryptoError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.0)
            .map_err(|_| CryptoError::InvalidKey("aes-256-gcm key".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encryption primitives consumed by the envelope codec.
pub trait EnvelopeCipher: Send + Sync {
    /// Encrypt plaintext for the holder of `remote_public_key` (base64).
    fn encrypt(&self, plaintext: &[u8], remote_public_key: &str)
        -> Result<Envelope, CryptoError>;

    /// Unseal a symmetric key with the local secret for `session_id`.
    fn decrypt_key(&self, sealed_key: &str, session_id: &str) -> Result<SymmetricKey, CryptoError>;

    /// Decrypt base64 ciphertext with an unsealed key and base64 iv.
    fn decrypt(&self, ciphertext: &str, key: &SymmetricKey, iv: &str)
        -> Result<Vec<u8>, CryptoError>;
}

/// X25519 + AES-256-GCM implementation backed by a local keyring.
pub struct SealedBoxCipher {
    keyring: Arc<Keyring>,
    rng: SystemRandom,
}

impl SealedBoxCipher {
    pub fn new(keyring: Arc<Keyring>) -> Self {
        Self {
            keyring,
            rng: SystemRandom::new(),
        }
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    fn fill(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        self.rng
            .fill(buf)
            .map_err(|_| CryptoError::EncryptionFailed("RNG failure".into()))
    }
}

/// Derive the key-encryption key from a DH output and both public keys.
fn derive_kek(
    shared: &[u8],
    ephemeral_pub: &[u8],
    remote_pub: &[u8],
) -> Result<LessSafeKey, CryptoError> {
    let mut salt_bytes = Vec::with_capacity(PUBLIC_KEY_LENGTH * 2);
    salt_bytes.extend_from_slice(ephemeral_pub);
    salt_bytes.extend_from_slice(remote_pub);

    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &salt_bytes);
    let prk = salt.extract(shared);
    let info = [SEAL_INFO];
    let okm = prk
        .expand(&info, &AES_256_GCM)
        .map_err(|_| CryptoError::InvalidKey("hkdf expand".into()))?;
    Ok(LessSafeKey::new(UnboundKey::from(okm)))
}

fn zero_nonce() -> Nonce {
    Nonce::assume_unique_for_key([0u8; NONCE_LEN])
}

impl EnvelopeCipher for SealedBoxCipher {
    fn encrypt(
        &self,
        plaintext: &[u8],
        remote_public_key: &str,
    ) -> Result<Envelope, CryptoError> {
        let remote = PublicKey::from(decode_key(remote_public_key)?);

        // Payload under a fresh symmetric key
        let mut key_bytes = [0u8; KEY_LENGTH];
        self.fill(&mut key_bytes)?;
        let key = SymmetricKey::from_bytes(key_bytes);
        key_bytes.iter_mut().for_each(|b| *b = 0);

        let mut iv = [0u8; NONCE_LEN];
        self.fill(&mut iv)?;
        let nonce = Nonce::try_assume_unique_for_key(&iv)
            .map_err(|_| CryptoError::EncryptionFailed("nonce error".into()))?;

        let mut data = plaintext.to_vec();
        key.aead()?
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut data)
            .map_err(|_| CryptoError::EncryptionFailed("seal failed".into()))?;

        // Seal the symmetric key for the remote
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&remote);
        let kek = derive_kek(shared.as_bytes(), ephemeral_pub.as_bytes(), remote.as_bytes())?;

        let mut sealed = key.0.to_vec();
        kek.seal_in_place_append_tag(zero_nonce(), Aad::empty(), &mut sealed)
            .map_err(|_| CryptoError::EncryptionFailed("key seal failed".into()))?;

        let mut encrypted_key = Vec::with_capacity(PUBLIC_KEY_LENGTH + sealed.len());
        encrypted_key.extend_from_slice(ephemeral_pub.as_bytes());
        encrypted_key.extend_from_slice(&sealed);

        Ok(Envelope {
            encrypted_key: BASE64.encode(encrypted_key),
            encrypted_data: BASE64.encode(data),
            iv: BASE64.encode(iv),
        })
    }

    fn decrypt_key(&self, sealed_key: &str, session_id: &str) -> Result<SymmetricKey, CryptoError> {
        let raw = BASE64.decode(sealed_key)?;
        if raw.len() != PUBLIC_KEY_LENGTH + KEY_LENGTH + AES_256_GCM.tag_len() {
            return Err(CryptoError::InvalidKey(format!(
                "sealed key has {} bytes",
                raw.len()
            )));
        }

        let (ephemeral_bytes, sealed) = raw.split_at(PUBLIC_KEY_LENGTH);
        let mut ephemeral = [0u8; PUBLIC_KEY_LENGTH];
        ephemeral.copy_from_slice(ephemeral_bytes);
        let ephemeral_pub = PublicKey::from(ephemeral);

        let local_pub = self
            .keyring
            .public_key(session_id)
            .ok_or_else(|| CryptoError::UnknownSession(session_id.to_string()))?;
        let local_pub = decode_key(&local_pub)?;

        let shared = self.keyring.agree(session_id, &ephemeral_pub)?;
        let kek = derive_kek(shared.as_bytes(), &ephemeral, &local_pub)?;

        let mut in_out = sealed.to_vec();
        let opened = kek
            .open_in_place(zero_nonce(), Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(opened);
        in_out.iter_mut().for_each(|b| *b = 0);
        Ok(SymmetricKey::from_bytes(key))
    }

    fn decrypt(
        &self,
        ciphertext: &str,
        key: &SymmetricKey,
        iv: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let iv_bytes = BASE64.decode(iv)?;
        let mut in_out = BASE64.decode(ciphertext)?;

        let nonce =
            Nonce::try_assume_unique_for_key(&iv_bytes).map_err(|_| CryptoError::DecryptionFailed)?;

        let plaintext = key
            .aead()?
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(plaintext.to_vec())
    }
}
