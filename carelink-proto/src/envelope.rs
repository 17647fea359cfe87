//! Legacy AES-128-CBC envelope codec.
//!
//! The backend wraps most payloads in a fixed-key AES-128-CBC envelope,
//! base64 on the wire. Two IV conventions coexist in deployed servers: an
//! explicit fixed IV for structured JSON payloads and an all-zero IV for
//! chat message bodies. Decoding therefore tries an ordered list of
//! strategies and accepts the first plausible plaintext.
//!
//! The key and IV are an external compatibility contract with the deployed
//! backend, not a security mechanism. Changing them breaks interop.

use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde_json::Value;

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;

/// Fixed 16-byte envelope key shared with the server.
const KEY: [u8; 16] = *b"abcdefghijklmnop";
/// Fixed IV used by the explicit-IV variant.
const EXPLICIT_IV: [u8; 16] = *b"8548962579816302";
/// All-zero IV used by the chat-body variant.
const ZERO_IV: [u8; 16] = [0u8; 16];

/// Decoded chat bodies longer than this are treated as decryption noise.
const MAX_BODY_LEN: usize = 10_000;

/// Which IV convention to use for one envelope operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvMode {
    /// The fixed explicit IV; used for structured JSON payloads.
    Explicit,
    /// The all-zero IV; used for chat message bodies.
    Zero,
}

impl IvMode {
    fn iv(self) -> &'static [u8; 16] {
        match self {
            Self::Explicit => &EXPLICIT_IV,
            Self::Zero => &ZERO_IV,
        }
    }
}

/// Error type for low-level envelope operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The wire text is not valid base64 after normalization.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Ciphertext length is not a whole number of AES blocks.
    #[error("ciphertext length {0} is not a multiple of the block size")]
    BlockLength(usize),
    /// CBC unpadding failed; wrong IV variant or corrupt data.
    #[error("unpadding failed")]
    Unpad,
    /// Decrypted bytes are not UTF-8 text.
    #[error("plaintext is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encrypts `plaintext` and returns the base64 wire form.
pub fn encrypt(plaintext: &str, mode: IvMode) -> String {
    let enc = Aes128CbcEnc::new(&KEY.into(), mode.iv().into());
    let ciphertext = enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    BASE64.encode(ciphertext)
}

/// Decrypts one wire string with one IV variant.
///
/// The input goes through base64 normalization first, so URL-safe alphabet
/// and broken padding from intermediate transports are tolerated.
///
/// # Errors
///
/// Returns an [`EnvelopeError`] when the input is not base64, not block
/// aligned, fails unpadding, or does not decode to UTF-8.
pub fn decrypt(wire: &str, mode: IvMode) -> Result<String, EnvelopeError> {
    let ciphertext = BASE64.decode(normalize_wire(wire))?;
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(EnvelopeError::BlockLength(ciphertext.len()));
    }
    let dec = Aes128CbcDec::new(&KEY.into(), mode.iv().into());
    let plaintext = dec
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| EnvelopeError::Unpad)?;
    Ok(String::from_utf8(plaintext)?)
}

/// Decodes an encrypted JSON payload.
///
/// Tries the explicit IV first, then the zero IV. A candidate plaintext is
/// accepted when, after stripping NUL bytes and trimming, it starts with
/// `{` or `[` and parses as JSON. Returns `None` when no strategy
/// produces valid JSON; this function never fails.
pub fn decode_json(wire: &str) -> Option<Value> {
    for mode in [IvMode::Explicit, IvMode::Zero] {
        let Ok(plaintext) = decrypt(wire, mode) else {
            continue;
        };
        let cleaned = clean(&plaintext);
        if !(cleaned.starts_with('{') || cleaned.starts_with('[')) {
            continue;
        }
        if let Ok(value) = serde_json::from_str(&cleaned) {
            return Some(value);
        }
    }
    None
}

/// Decodes a chat message body.
///
/// Bodies historically arrive both encrypted and plain, and the two IV
/// conventions are tried in the opposite order from JSON payloads. Input
/// that does not look like wire form is returned as-is; when every
/// strategy fails the raw input is returned unchanged so a message is
/// never lost to a codec mismatch.
pub fn decode_body(wire: &str) -> String {
    let raw = wire.trim();
    if !looks_like_wire(raw) {
        return raw.to_string();
    }
    for mode in [IvMode::Zero, IvMode::Explicit] {
        let Ok(plaintext) = decrypt(raw, mode) else {
            continue;
        };
        let cleaned = clean(&plaintext);
        if !cleaned.is_empty()
            && cleaned.len() <= MAX_BODY_LEN
            && cleaned != raw
            && !looks_like_wire(&cleaned)
            && displayable(&cleaned)
        {
            return cleaned;
        }
    }
    raw.to_string()
}

/// Whether a candidate plaintext is free of control characters.
///
/// Decrypting with the wrong IV garbles only the first CBC block, so
/// unpadding can still succeed; the garbled bytes land as control
/// characters, which no real chat body contains.
fn displayable(s: &str) -> bool {
    !s.chars().any(|c| c.is_control() && !c.is_whitespace())
}

/// Whether a string is plausibly the base64 wire form of an envelope.
pub fn looks_like_wire(s: &str) -> bool {
    s.len() >= 16
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// Normalizes wire text to standard base64: strips whitespace, maps the
/// URL-safe alphabet back, and restores `=` padding.
fn normalize_wire(wire: &str) -> String {
    let mut out: String = wire
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

fn clean(plaintext: &str) -> String {
    plaintext.replace('\0', "").trim().to_string()
}
