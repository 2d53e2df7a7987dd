//! Fixed-size authenticated frame: `tag(16) || iv(16) || ciphertext(992)`.
//!
//! The ciphertext decrypts to `padding || message || nonce(26) || length(5)`, where the
//! padding is ASCII `'0'` and `length` counts `message || nonce` in zero-padded decimal.

use std::fmt;

use rand::{Rng, distributions::Alphanumeric};
use tracing::debug;

use crate::keys::{IV_LEN, Iv, KeyMaterial, TAG_LEN};

use super::ChannelError;

pub const FRAME_LEN: usize = 1024;
pub const CIPHERTEXT_LEN: usize = FRAME_LEN - TAG_LEN - IV_LEN;
pub const LENGTH_FIELD_LEN: usize = 5;
/// Room for `padding || message || nonce`.
pub const BODY_LEN: usize = CIPHERTEXT_LEN - LENGTH_FIELD_LEN;
pub const NONCE_LEN: usize = 26;
/// Largest message that still fits next to its nonce.
pub const MAX_MESSAGE_LEN: usize = BODY_LEN - NONCE_LEN;

const PAD: u8 = b'0';

pub type Frame = [u8; FRAME_LEN];

/// Per-exchange value binding a reply to its request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    pub fn generate() -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        for (byte, c) in nonce
            .iter_mut()
            .zip(rand::rngs::OsRng.sample_iter(Alphanumeric))
        {
            *byte = c;
        }
        Self(nonce)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub message: Vec<u8>,
    pub nonce: Nonce,
}

/// Seals `message` under a freshly generated nonce and returns both.
pub fn encode(message: &[u8], keys: &KeyMaterial) -> Result<(Frame, Nonce), ChannelError> {
    let nonce = Nonce::generate();
    let frame = encode_with_nonce(message, &nonce, keys)?;
    Ok((frame, nonce))
}

/// Seals `message` under `nonce`; replies reuse the request's nonce.
pub fn encode_with_nonce(
    message: &[u8],
    nonce: &Nonce,
    keys: &KeyMaterial,
) -> Result<Frame, ChannelError> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(ChannelError::MessageTooLong { len: message.len() });
    }
    let content_len = message.len() + NONCE_LEN;
    let start = BODY_LEN - content_len;

    let mut plaintext = [PAD; CIPHERTEXT_LEN];
    plaintext[start..MAX_MESSAGE_LEN].copy_from_slice(message);
    plaintext[MAX_MESSAGE_LEN..BODY_LEN].copy_from_slice(&nonce.0);
    let length = format!("{content_len:0width$}", width = LENGTH_FIELD_LEN);
    plaintext[BODY_LEN..].copy_from_slice(length.as_bytes());

    let iv = KeyMaterial::random_iv();
    keys.encrypt(&iv, &mut plaintext);
    let tag = keys.tag(&iv, &plaintext);

    let mut frame = [0u8; FRAME_LEN];
    frame[..TAG_LEN].copy_from_slice(&tag);
    frame[TAG_LEN..TAG_LEN + IV_LEN].copy_from_slice(&iv);
    frame[TAG_LEN + IV_LEN..].copy_from_slice(&plaintext);
    debug!(len = message.len(), %nonce, "Encoded frame");
    Ok(frame)
}

/// Authenticates, then decrypts. Nothing is decrypted unless the tag verifies.
pub fn decode(
    frame: &[u8],
    keys: &KeyMaterial,
    expected_nonce: Option<&Nonce>,
) -> Result<Decoded, ChannelError> {
    if frame.len() != FRAME_LEN {
        return Err(ChannelError::Truncated { len: frame.len() });
    }
    let (tag, rest) = frame.split_at(TAG_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);
    let iv: Iv = iv.try_into().map_err(|_| ChannelError::Malformed)?;
    if !keys.verify(tag, &iv, ciphertext) {
        return Err(ChannelError::IntegrityViolation);
    }

    let mut plaintext = ciphertext.to_vec();
    keys.decrypt(&iv, &mut plaintext);

    let content_len = parse_length(&plaintext[BODY_LEN..])?;
    if !(NONCE_LEN..=BODY_LEN).contains(&content_len) {
        return Err(ChannelError::Malformed);
    }
    let start = BODY_LEN - content_len;
    if plaintext[..start].iter().any(|b| *b != PAD) {
        return Err(ChannelError::Malformed);
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&plaintext[MAX_MESSAGE_LEN..BODY_LEN]);
    let nonce = Nonce(nonce);
    if let Some(expected) = expected_nonce {
        if *expected != nonce {
            return Err(ChannelError::NonceMismatch);
        }
    }

    plaintext.truncate(MAX_MESSAGE_LEN);
    plaintext.drain(..start);
    debug!(len = plaintext.len(), %nonce, "Decoded frame");
    Ok(Decoded {
        message: plaintext,
        nonce,
    })
}

fn parse_length(field: &[u8]) -> Result<usize, ChannelError> {
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(ChannelError::Malformed);
    }
    field
        .iter()
        .try_fold(0usize, |acc, digit| {
            acc.checked_mul(10)?.checked_add(usize::from(digit - b'0'))
        })
        .ok_or(ChannelError::Malformed)
}
