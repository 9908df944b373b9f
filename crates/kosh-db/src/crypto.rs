// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Master-key envelope and record-body cipher.
//!
//! This is the `K05Hv0` compatibility format and it must be reproduced
//! bit-for-bit to read existing databases. Its known weaknesses, preserved
//! deliberately:
//!
//! - AES is used in raw ECB mode. The only thing breaking ECB patterns in
//!   record bodies is the XOR pre-whitening with a per-record random salt.
//! - Record bodies carry a SHA-1 integrity tag; the master-key wrap carries a
//!   SHA-256 tag. Neither is an HMAC.
//! - The passphrase is hashed exactly once (no KDF iteration, no stretching).
//!
//! A future `K05Hv1` header may introduce AES-GCM + Argon2 with explicit
//! migration; until then, do not "fix" any of the above.
//!
//! Wrapped master key (`k:` line): `base64(AES-ECB_{SHA256(pass) ⊕ S}(K ∥
//! SHA256(K)) ∥ S)`. Record body (`p:` line): plaintext is XORed with the
//! cyclically repeated salt, then `whitened ∥ salt ∥ SHA1(plaintext)` is
//! tail-padded to the AES block size and ECB-encrypted under `K`.

use crate::error::{Error, Result};
use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{RngCore, rngs::OsRng};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const AES_BLOCK: usize = 16;
const KEY_LENGTH: usize = 32;
const SHA1_LENGTH: usize = 20;
const SHA256_LENGTH: usize = 32;

/// Line prefix of a wrapped master key in the database file.
pub const KEY_PREFIX: &str = "k:";

fn rand_256() -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut buf = Zeroizing::new([0u8; KEY_LENGTH]);
    OsRng.fill_bytes(buf.as_mut());
    buf
}

fn ecb_encrypt(key: &[u8; KEY_LENGTH], data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len() % AES_BLOCK, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(AES_BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

fn ecb_decrypt(key: &[u8; KEY_LENGTH], data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.is_empty() || data.len() % AES_BLOCK != 0 {
        return Err(Error::MalformedBlob(format!(
            "ciphertext length {} is not a positive multiple of the AES block size",
            data.len()
        )));
    }
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut out = Zeroizing::new(data.to_vec());
    for block in out.chunks_exact_mut(AES_BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

fn xor_with_repeated_salt(data: &mut [u8], salt: &[u8; KEY_LENGTH]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= salt[i % KEY_LENGTH];
    }
}

/// Append `n` zero bytes then the single byte `n+1` so the total length is a
/// multiple of the AES block size. `n` is always at least 1, matching the
/// historical format (an exact-multiple payload gains a full extra block).
fn pad(data: &mut Vec<u8>) {
    let n = AES_BLOCK - ((data.len() + 1) % AES_BLOCK);
    data.resize(data.len() + n, 0);
    data.push((n + 1) as u8);
}

fn unpad(data: &[u8]) -> Result<&[u8]> {
    let marker = *data.last().ok_or(Error::ChecksumFailure)? as usize;
    if marker == 0 || marker > data.len() {
        return Err(Error::ChecksumFailure);
    }
    Ok(&data[..data.len() - marker])
}

/// A 256-bit record-encryption secret with a persistent wrapped form.
///
/// The secret lives only in memory and is dropped (zeroized) on [`expire`];
/// the wrapped form is what goes into the database file. Unwrapping is
/// self-verifying: a wrong passphrase fails with `ChecksumFailure`, never a
/// false positive.
///
/// [`expire`]: MasterKey::expire
pub struct MasterKey {
    key: Option<Zeroizing<[u8; KEY_LENGTH]>>,
    blob: String,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Neither the secret nor the wrapped form belongs in debug output.
        f.debug_struct("MasterKey")
            .field("expired", &self.key.is_none())
            .finish_non_exhaustive()
    }
}

impl MasterKey {
    /// Create a fresh key: draw a random 256-bit secret and wrap it under
    /// `passphrase`.
    pub fn generate(passphrase: &str) -> Self {
        let key = rand_256();
        let blob = Self::wrap(&key, passphrase);
        Self { key: Some(key), blob }
    }

    /// Load a key from a `k:` line, unwrapping with `passphrase`.
    pub fn unwrap(line: &str, passphrase: &str) -> Result<Self> {
        let blob = line
            .strip_prefix(KEY_PREFIX)
            .ok_or_else(|| Error::MalformedBlob("missing k: prefix".into()))?
            .trim_end();
        let data = STANDARD.decode(blob)?;
        if data.len() != 2 * KEY_LENGTH + SHA256_LENGTH {
            return Err(Error::MalformedBlob(format!(
                "wrapped key is {} bytes, expected {}",
                data.len(),
                2 * KEY_LENGTH + SHA256_LENGTH
            )));
        }
        let (ciphertext, salt) = data.split_at(data.len() - KEY_LENGTH);

        let mut wrapping = Zeroizing::new([0u8; KEY_LENGTH]);
        wrapping.copy_from_slice(&Sha256::digest(passphrase.as_bytes()));
        for (w, s) in wrapping.iter_mut().zip(salt) {
            *w ^= s;
        }

        let plain = ecb_decrypt(&wrapping, ciphertext)?;
        let (key_bytes, tag) = plain.split_at(KEY_LENGTH);
        if Sha256::digest(key_bytes).as_slice() != tag {
            return Err(Error::ChecksumFailure);
        }

        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        key.copy_from_slice(key_bytes);
        Ok(Self {
            key: Some(key),
            blob: blob.to_string(),
        })
    }

    fn wrap(key: &[u8; KEY_LENGTH], passphrase: &str) -> String {
        let salt = rand_256();
        let mut wrapping = Zeroizing::new([0u8; KEY_LENGTH]);
        wrapping.copy_from_slice(&Sha256::digest(passphrase.as_bytes()));
        for (w, s) in wrapping.iter_mut().zip(salt.iter()) {
            *w ^= s;
        }

        let mut payload = Zeroizing::new(Vec::with_capacity(KEY_LENGTH + SHA256_LENGTH));
        payload.extend_from_slice(key.as_ref());
        payload.extend_from_slice(&Sha256::digest(key.as_ref()));

        let mut out = ecb_encrypt(&wrapping, &payload);
        out.extend_from_slice(salt.as_ref());
        STANDARD.encode(out)
    }

    /// Re-wrap the current secret under a new passphrase, with a fresh salt.
    /// Record blobs are unaffected; they are encrypted under the secret, not
    /// the passphrase.
    pub fn rewrap(&mut self, passphrase: &str) -> Result<()> {
        let key = self.key.as_ref().ok_or(Error::KeyExpired)?;
        self.blob = Self::wrap(key, passphrase);
        Ok(())
    }

    /// Drop the in-memory secret. Subsequent encrypt/decrypt operations fail
    /// with [`Error::KeyExpired`] until the key is unwrapped again.
    pub fn expire(&mut self) {
        self.key = None;
    }

    /// Whether the in-memory secret has been expired.
    pub fn is_expired(&self) -> bool {
        self.key.is_none()
    }

    /// Recover the secret from the wrapped form after an [`expire`].
    ///
    /// [`expire`]: MasterKey::expire
    pub fn unlock(&mut self, passphrase: &str) -> Result<()> {
        let line = self.encoded();
        let fresh = Self::unwrap(&line, passphrase)?;
        self.key = fresh.key;
        Ok(())
    }

    /// The `k:`-prefixed line form persisted in the database file.
    pub fn encoded(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.blob)
    }

    /// Encrypt a record body under this key.
    ///
    /// Returns the base64 ciphertext (no prefix). Fails with `KeyExpired` if
    /// the key has been expired.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let key = self.key.as_ref().ok_or(Error::KeyExpired)?;
        let salt = rand_256();
        let tag = Sha1::digest(plaintext);

        let mut payload = Zeroizing::new(Vec::with_capacity(
            plaintext.len() + KEY_LENGTH + SHA1_LENGTH + AES_BLOCK,
        ));
        payload.extend_from_slice(plaintext);
        xor_with_repeated_salt(&mut payload, &salt);
        payload.extend_from_slice(salt.as_ref());
        payload.extend_from_slice(&tag);
        pad(&mut payload);

        Ok(STANDARD.encode(ecb_encrypt(key, &payload)))
    }

    /// Decrypt a base64 record body.
    ///
    /// Fails with `ChecksumFailure` when this key did not encrypt the blob,
    /// `KeyExpired` when the key is no longer in memory.
    pub fn decrypt(&self, blob: &str) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.key.as_ref().ok_or(Error::KeyExpired)?;
        let data = STANDARD.decode(blob.trim_end())?;
        let plain = ecb_decrypt(key, &data)?;
        let payload = unpad(&plain)?;
        if payload.len() < KEY_LENGTH + SHA1_LENGTH {
            return Err(Error::ChecksumFailure);
        }

        let (rest, tag) = payload.split_at(payload.len() - SHA1_LENGTH);
        let (whitened, salt) = rest.split_at(rest.len() - KEY_LENGTH);
        let mut salt_arr = [0u8; KEY_LENGTH];
        salt_arr.copy_from_slice(salt);

        let mut plaintext = Zeroizing::new(whitened.to_vec());
        xor_with_repeated_salt(&mut plaintext, &salt_arr);

        if Sha1::digest(plaintext.as_slice()).as_slice() != tag {
            return Err(Error::ChecksumFailure);
        }
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let key = MasterKey::generate("correct horse");
        let line = key.encoded();
        assert!(line.starts_with("k:"));
        let again = MasterKey::unwrap(&line, "correct horse").unwrap();
        // Same secret: a blob encrypted by one decrypts under the other.
        let blob = key.encrypt(b"battery staple").unwrap();
        assert_eq!(again.decrypt(&blob).unwrap().as_slice(), b"battery staple");
    }

    #[test]
    fn wrong_passphrase_is_checksum_failure() {
        let key = MasterKey::generate("pw");
        match MasterKey::unwrap(&key.encoded(), "wrong") {
            Err(Error::ChecksumFailure) => {}
            other => panic!("expected ChecksumFailure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn trailing_newline_is_a_different_passphrase() {
        let key = MasterKey::generate("pw");
        assert!(matches!(
            MasterKey::unwrap(&key.encoded(), "pw\n"),
            Err(Error::ChecksumFailure)
        ));
    }

    #[test]
    fn record_roundtrip_and_cross_key_rejection() {
        let a = MasterKey::generate("a");
        let b = MasterKey::generate("b");
        for plaintext in [
            &b""[..],
            &b"x"[..],
            &b"exactly fifteen."[..],  // (len+1) % 16 == 1
            &b"0123456789abcde"[..],   // (len+1) % 16 == 0
            "unicode \u{2603} body".as_bytes(),
        ] {
            let blob = a.encrypt(plaintext).unwrap();
            assert_eq!(a.decrypt(&blob).unwrap().as_slice(), plaintext);
            assert!(matches!(b.decrypt(&blob), Err(Error::ChecksumFailure)));
        }
    }

    #[test]
    fn ciphertexts_are_salted() {
        let key = MasterKey::generate("pw");
        let one = key.encrypt(b"same plaintext").unwrap();
        let two = key.encrypt(b"same plaintext").unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn expire_then_unlock() {
        let mut key = MasterKey::generate("pw");
        let blob = key.encrypt(b"secret").unwrap();
        key.expire();
        assert!(key.is_expired());
        assert!(matches!(key.decrypt(&blob), Err(Error::KeyExpired)));
        assert!(matches!(key.encrypt(b"x"), Err(Error::KeyExpired)));
        assert!(matches!(key.unlock("nope"), Err(Error::ChecksumFailure)));
        key.unlock("pw").unwrap();
        assert_eq!(key.decrypt(&blob).unwrap().as_slice(), b"secret");
    }

    #[test]
    fn rewrap_preserves_secret() {
        let mut key = MasterKey::generate("old");
        let blob = key.encrypt(b"payload").unwrap();
        key.rewrap("new").unwrap();
        let reopened = MasterKey::unwrap(&key.encoded(), "new").unwrap();
        assert_eq!(reopened.decrypt(&blob).unwrap().as_slice(), b"payload");
        assert!(matches!(
            MasterKey::unwrap(&key.encoded(), "old"),
            Err(Error::ChecksumFailure)
        ));
    }

    #[test]
    fn truncated_blob_is_malformed_not_panic() {
        let key = MasterKey::generate("pw");
        assert!(key.decrypt("AAAA").is_err());
        assert!(key.decrypt("").is_err());
        assert!(MasterKey::unwrap("k:AAAA", "pw").is_err());
    }
}
