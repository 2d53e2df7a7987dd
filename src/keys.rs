use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use aes::Aes128;
use cfb8::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Bytes of shared secret stored in the auth file.
pub const SECRET_LEN: usize = 32;
/// Length of each derived key.
pub const KEY_LEN: usize = 16;
/// AES block size, also the IV length.
pub const IV_LEN: usize = 16;
/// HMAC-MD5 output length.
pub const TAG_LEN: usize = 16;

type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;
type HmacMd5 = Hmac<Md5>;

pub type Iv = [u8; IV_LEN];
pub type Tag = [u8; TAG_LEN];

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Auth file `{}` already exists", path.display())]
    AlreadyExists { path: PathBuf },
    #[error("Failed to access auth file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Auth file `{}` does not hold 32 hex-encoded bytes", path.display())]
    Malformed { path: PathBuf },
}

/// Encryption and authentication keys split from the shared secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    enc_key: [u8; KEY_LEN],
    mac_key: [u8; KEY_LEN],
}

impl KeyMaterial {
    /// First half encrypts, second half authenticates.
    pub fn from_secret(secret: &[u8; SECRET_LEN]) -> Self {
        let mut enc_key = [0u8; KEY_LEN];
        let mut mac_key = [0u8; KEY_LEN];
        enc_key.copy_from_slice(&secret[..KEY_LEN]);
        mac_key.copy_from_slice(&secret[KEY_LEN..]);
        Self { enc_key, mac_key }
    }

    /// Draws a fresh secret and writes it hex-encoded to `path`. Never overwrites.
    pub fn bootstrap(path: &Path) -> Result<Self, KeyError> {
        let io_err = |source| KeyError::Io {
            path: path.to_owned(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::AlreadyExists => KeyError::AlreadyExists {
                    path: path.to_owned(),
                },
                _ => io_err(source),
            })?;

        let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut secret[..]);
        let encoded = Zeroizing::new(hex::encode(&secret[..]));
        file.write_all(encoded.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        debug!(path = %path.display(), "Created auth file");
        Ok(Self::from_secret(&secret))
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let content = Zeroizing::new(fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.to_owned(),
            source,
        })?);
        let malformed = || KeyError::Malformed {
            path: path.to_owned(),
        };
        let mut secret = Zeroizing::new([0u8; SECRET_LEN]);
        hex::decode_to_slice(content.trim(), &mut secret[..]).map_err(|_| malformed())?;
        Ok(Self::from_secret(&secret))
    }

    pub fn random_iv() -> Iv {
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        iv
    }

    pub fn encrypt(&self, iv: &Iv, buf: &mut [u8]) {
        Aes128Cfb8Enc::new(&self.enc_key.into(), &(*iv).into()).encrypt(buf);
    }

    pub fn decrypt(&self, iv: &Iv, buf: &mut [u8]) {
        Aes128Cfb8Dec::new(&self.enc_key.into(), &(*iv).into()).decrypt(buf);
    }

    fn mac(&self) -> HmacMd5 {
        <HmacMd5 as Mac>::new_from_slice(&self.mac_key).expect("HMAC accepts keys of any length")
    }

    /// HMAC-MD5 over `iv || ciphertext`.
    pub fn tag(&self, iv: &Iv, ciphertext: &[u8]) -> Tag {
        let mut mac = self.mac();
        mac.update(iv);
        mac.update(ciphertext);
        mac.finalize().into_bytes().into()
    }

    /// Constant-time check of `tag` against `iv || ciphertext`.
    pub fn verify(&self, tag: &[u8], iv: &Iv, ciphertext: &[u8]) -> bool {
        let mut mac = self.mac();
        mac.update(iv);
        mac.update(ciphertext);
        mac.verify_slice(tag).is_ok()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}
