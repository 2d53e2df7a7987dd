use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    config::CARD_SUFFIX,
    keys::{IV_LEN, Iv, KeyMaterial},
    message::{AccountName, Pin},
};

#[derive(Debug, Error)]
pub enum CardError {
    #[error("Card `{}` already exists", path.display())]
    AlreadyExists { path: PathBuf },
    #[error("Failed to access card `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Card `{}` is corrupted", path.display())]
    Corrupted { path: PathBuf },
}

/// `<account>.card` in the working directory.
pub fn default_card_path(account: &AccountName) -> PathBuf {
    PathBuf::from(format!("{account}{CARD_SUFFIX}"))
}

/// Seals `pin` into a new card file as `iv || ciphertext`.
pub fn create_card(path: &Path, pin: &Pin, keys: &KeyMaterial) -> Result<(), CardError> {
    let io_err = |source| CardError::Io {
        path: path.to_owned(),
        source,
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => CardError::AlreadyExists {
                path: path.to_owned(),
            },
            _ => io_err(source),
        })?;

    let iv = KeyMaterial::random_iv();
    let mut sealed = Zeroizing::new(Vec::with_capacity(IV_LEN + pin.as_bytes().len()));
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(pin.as_bytes());
    keys.encrypt(&iv, &mut sealed[IV_LEN..]);
    file.write_all(&sealed).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    debug!(path = %path.display(), "Created card");
    Ok(())
}

/// Recovers the PIN from `card`, or from the account's default card.
///
/// Returns `Ok(None)` when no card was given and the default one does not exist, which is
/// only meaningful when creating an account.
pub fn get_pin(
    card: Option<&Path>,
    account: &AccountName,
    keys: &KeyMaterial,
) -> Result<Option<Pin>, CardError> {
    let path = match card {
        Some(path) => path.to_owned(),
        None => {
            let path = default_card_path(account);
            if !path.is_file() {
                return Ok(None);
            }
            path
        }
    };
    read_pin(&path, keys).map(Some)
}

fn read_pin(path: &Path, keys: &KeyMaterial) -> Result<Pin, CardError> {
    let mut content = Zeroizing::new(fs::read(path).map_err(|source| CardError::Io {
        path: path.to_owned(),
        source,
    })?);
    let corrupted = || CardError::Corrupted {
        path: path.to_owned(),
    };
    if content.len() <= IV_LEN {
        return Err(corrupted());
    }
    let (iv, sealed) = content.split_at_mut(IV_LEN);
    let iv: Iv = iv.try_into().map_err(|_| corrupted())?;
    keys.decrypt(&iv, sealed);
    Pin::from_bytes(sealed).ok_or_else(corrupted)
}
