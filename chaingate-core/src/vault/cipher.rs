//! Symmetric sealing of combined keys and scrypt hashing of secrets.

use super::VaultError;
use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

const IV_LEN: usize = 16;
pub(crate) const MASTER_KEY_LEN: usize = 32;
pub(crate) const HASH_LEN: usize = 32;

/// Standard padded base64, the encoding used by previously issued keys.
pub(crate) const BASE64: fast32::base64::Alphabet64Padded = fast32::base64::RFC4648;

/// Process-wide AES-256 key protecting every combined API key.
pub(crate) struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        <[u8; MASTER_KEY_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| VaultError::InvalidMasterKey(bytes.len()))
    }

    /// AES-256-CFB with a random IV prefixed to the ciphertext, base64.
    pub(crate) fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let iv: [u8; IV_LEN] = rand::random();
        let mut buf = Vec::with_capacity(IV_LEN + plaintext.len());
        buf.extend_from_slice(&iv);
        buf.extend_from_slice(plaintext.as_bytes());

        Aes256CfbEnc::new_from_slices(&self.0, &iv)
            .map_err(|e| VaultError::Crypto(e.to_string()))?
            .encrypt(&mut buf[IV_LEN..]);
        Ok(BASE64.encode(&buf))
    }

    pub(crate) fn open(&self, sealed: &str) -> Result<String, VaultError> {
        let mut buf = BASE64
            .decode_str(sealed)
            .map_err(|_| VaultError::Crypto("sealed value is not base64".to_string()))?;
        if buf.len() <= IV_LEN {
            return Err(VaultError::Crypto("sealed value is too short".to_string()));
        }

        let (iv, ciphertext) = buf.split_at_mut(IV_LEN);
        Aes256CfbDec::new_from_slices(&self.0, iv)
            .map_err(|e| VaultError::Crypto(e.to_string()))?
            .decrypt(ciphertext);
        String::from_utf8(ciphertext.to_vec())
            .map_err(|_| VaultError::Crypto("sealed value is not valid text".to_string()))
    }
}

/// Cost parameters of the scrypt hash applied to secret keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// `N = 2^log_n`.
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    /// N=32768, r=8, p=1.
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    pub(crate) fn to_scrypt(self) -> Result<scrypt::Params, VaultError> {
        scrypt::Params::new(self.log_n, self.r, self.p, HASH_LEN)
            .map_err(|e| VaultError::InvalidKdfParams(e.to_string()))
    }
}

/// scrypt(secret, salt), run on the blocking pool.
pub(crate) async fn hash_secret(
    params: &scrypt::Params,
    secret: &str,
    salt: &[u8],
) -> Result<[u8; HASH_LEN], VaultError> {
    let params = params.clone();
    let secret = secret.as_bytes().to_vec();
    let salt = salt.to_vec();
    tokio::task::spawn_blocking(move || {
        let mut out = [0u8; HASH_LEN];
        scrypt::scrypt(&secret, &salt, &params, &mut out)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        Ok(out)
    })
    .await
    .map_err(|e| VaultError::Crypto(format!("hashing task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MasterKey {
        MasterKey::from_bytes(&[7u8; MASTER_KEY_LEN]).unwrap()
    }

    #[test]
    fn test_seal_open_symmetry() {
        let key = key();
        let combined = "0190f3c1-7a9e-7c4b-9a55-3b1f8a2e4d10_q1w2e3r4t5y6u7i8o9p0aa";
        let sealed = key.seal(combined).unwrap();
        assert_ne!(sealed, combined);
        assert_eq!(key.open(&sealed).unwrap(), combined);
    }

    #[test]
    fn test_random_iv_changes_ciphertext() {
        let key = key();
        let a = key.seal("same input").unwrap();
        let b = key.seal("same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(key.open(&a).unwrap(), key.open(&b).unwrap());
    }

    #[test]
    fn test_sealed_values_use_padded_base64() {
        assert_eq!(BASE64.decode_str("AAECAw==").unwrap(), [0u8, 1, 2, 3]);
        assert_eq!(BASE64.encode(&[0u8, 1, 2, 3]), "AAECAw==");

        // 16-byte IV plus 3 bytes of text needs two padding characters.
        let key = key();
        let sealed = key.seal("abc").unwrap();
        assert_eq!(sealed.len(), 28);
        assert!(sealed.ends_with("=="));
        assert_eq!(key.open(&sealed).unwrap(), "abc");
    }

    #[test]
    fn test_open_rejects_malformed_input() {
        let key = key();
        assert!(key.open("not base64 !!").is_err());
        assert!(key.open(&BASE64.encode(&[1u8; IV_LEN])).is_err());
    }

    #[test]
    fn test_wrong_master_key_length() {
        assert!(matches!(
            MasterKey::from_bytes(&[0u8; 16]),
            Err(VaultError::InvalidMasterKey(16))
        ));
    }

    #[tokio::test]
    async fn test_hash_is_deterministic_per_salt() {
        let params = KdfParams {
            log_n: 4,
            r: 8,
            p: 1,
        }
        .to_scrypt()
        .unwrap();
        let a = hash_secret(&params, "secret", b"salt-one").await.unwrap();
        let b = hash_secret(&params, "secret", b"salt-one").await.unwrap();
        let c = hash_secret(&params, "secret", b"salt-two").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
