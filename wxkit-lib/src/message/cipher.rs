//! AES-256-CBC envelope cipher for the messaging callback.
//!
//! # Wire Format
//!
//! The plaintext handed to the block cipher is:
//!
//! ```text
//! [16 bytes random nonce][4 bytes BE body length][N bytes body][app id][pad]
//! ```
//!
//! `pad` is PKCS#7-style over a 32-byte block: every pad byte holds the pad
//! length, and a full 32-byte block is appended when the input is already
//! aligned. The cipher itself runs without padding; the length prefix, not
//! the pad, decides where the body ends.

use aes::Aes256;
use base64::{
    alphabet,
    engine::{general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::WxkitError;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// CBC initialization vector size (first half of the key).
pub const IV_SIZE: usize = 16;

/// Size of the random envelope nonce.
pub const NONCE_SIZE: usize = 16;

/// Size of the big-endian body length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Block size the envelope is padded to.
pub const PAD_BLOCK_SIZE: usize = 32;

const AES_BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

// The console hands out 43 unpadded characters; trailing bits are not
// guaranteed to be zero.
const AES_KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Envelope cipher errors.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("AES key is not valid base64: {0}")]
    KeyEncoding(String),
    #[error("AES key decodes to {0} bytes, expected 32")]
    KeyLength(usize),
    #[error("ciphertext is not valid base64: {0}")]
    CiphertextEncoding(String),
    #[error("ciphertext length {0} is not a positive multiple of the AES block size")]
    BlockAlignment(usize),
    #[error("envelope too short: {0} bytes")]
    EnvelopeTooShort(usize),
    #[error("length prefix {declared} exceeds the {available} bytes remaining")]
    LengthOverflow { declared: usize, available: usize },
    #[error("invalid padding")]
    Padding,
    #[error("cipher failure: {0}")]
    Cipher(String),
}

impl CipherError {
    /// True for failures caused by the configured key rather than the payload.
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyEncoding(_) | Self::KeyLength(_))
    }
}

impl From<CipherError> for WxkitError {
    fn from(err: CipherError) -> Self {
        if err.is_key_error() {
            WxkitError::configuration("aes_key", err.to_string())
        } else {
            WxkitError::Decryption(err.to_string())
        }
    }
}

/// Result type for envelope cipher operations.
pub type CipherResult<T> = Result<T, CipherError>;

/// Decoded `EncodingAESKey`. The first 16 bytes double as the IV.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Decode the configured key string with a `=` appended.
    pub fn from_encoded(aes_key: &str) -> CipherResult<Self> {
        let decoded = AES_KEY_ENGINE
            .decode(format!("{}=", aes_key.trim()))
            .map_err(|e| CipherError::KeyEncoding(e.to_string()))?;

        let bytes: [u8; KEY_SIZE] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::KeyLength(decoded.len()))?;

        Ok(Self { bytes })
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// The raw key.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// The CBC IV derived from the key.
    pub fn iv(&self) -> &[u8] {
        &self.bytes[..IV_SIZE]
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Plaintext layout exchanged over the messaging channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_SIZE],
    pub body: Vec<u8>,
    pub app_id: Vec<u8>,
}

impl Envelope {
    /// Build an envelope with a fresh random nonce.
    pub fn new(body: impl Into<Vec<u8>>, app_id: impl Into<Vec<u8>>) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::with_nonce(nonce, body, app_id)
    }

    /// Build an envelope with a caller-chosen nonce.
    pub fn with_nonce(
        nonce: [u8; NONCE_SIZE],
        body: impl Into<Vec<u8>>,
        app_id: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            nonce,
            body: body.into(),
            app_id: app_id.into(),
        }
    }

    /// Serialize to `nonce | len | body | app_id` (unpadded).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            NONCE_SIZE + LENGTH_PREFIX_SIZE + self.body.len() + self.app_id.len(),
        );
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&self.app_id);
        out
    }

    /// Parse a decrypted buffer, slicing the body by its length prefix.
    ///
    /// Trailing padding is removed from the app id when it is well formed;
    /// otherwise the remainder is kept as-is.
    pub fn decode(buf: &[u8]) -> CipherResult<Self> {
        let header = NONCE_SIZE + LENGTH_PREFIX_SIZE;
        if buf.len() < header {
            return Err(CipherError::EnvelopeTooShort(buf.len()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[..NONCE_SIZE]);

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&buf[NONCE_SIZE..header]);
        let declared = u32::from_be_bytes(prefix) as usize;

        let rest = &buf[header..];
        if declared > rest.len() {
            return Err(CipherError::LengthOverflow {
                declared,
                available: rest.len(),
            });
        }

        let (body, tail) = rest.split_at(declared);
        let app_id = pkcs7_unpad(tail).unwrap_or(tail);

        Ok(Self {
            nonce,
            body: body.to_vec(),
            app_id: app_id.to_vec(),
        })
    }
}

/// Pad to a 32-byte boundary; the pad byte equals the pad length.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = PAD_BLOCK_SIZE - (data.len() % PAD_BLOCK_SIZE);
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Strip padding added by [`pkcs7_pad`].
pub fn pkcs7_unpad(data: &[u8]) -> CipherResult<&[u8]> {
    let pad = *data.last().ok_or(CipherError::Padding)? as usize;
    if pad == 0 || pad > PAD_BLOCK_SIZE || pad > data.len() {
        return Err(CipherError::Padding);
    }
    Ok(&data[..data.len() - pad])
}

/// Pad and encrypt an envelope, returning raw ciphertext.
pub fn seal(key: &SymmetricKey, envelope: &Envelope) -> CipherResult<Vec<u8>> {
    let padded = pkcs7_pad(&envelope.encode());
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), key.iv())
        .map_err(|e| CipherError::Cipher(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(&padded))
}

/// Decrypt raw ciphertext and parse the envelope inside it.
pub fn open(key: &SymmetricKey, ciphertext: &[u8]) -> CipherResult<Envelope> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(CipherError::BlockAlignment(ciphertext.len()));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), key.iv())
        .map_err(|e| CipherError::Cipher(e.to_string()))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| CipherError::Cipher(e.to_string()))?;

    Envelope::decode(&plaintext)
}

/// Base64 wrapper around [`seal`].
pub fn seal_base64(key: &SymmetricKey, envelope: &Envelope) -> CipherResult<String> {
    Ok(STANDARD.encode(seal(key, envelope)?))
}

/// Base64 wrapper around [`open`].
pub fn open_base64(key: &SymmetricKey, ciphertext: &str) -> CipherResult<Envelope> {
    let raw = STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| CipherError::CiphertextEncoding(e.to_string()))?;
    open(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64 of bytes 0..32 without the trailing '='
    const KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";

    fn test_key() -> SymmetricKey {
        SymmetricKey::from_encoded(KEY).unwrap()
    }

    #[test]
    fn test_key_decodes_to_32_bytes() {
        let key = test_key();
        let expected: Vec<u8> = (0u8..32).collect();
        assert_eq!(key.as_bytes().as_slice(), expected.as_slice());
        assert_eq!(key.iv(), &expected[..16]);
    }

    #[test]
    fn test_short_key_rejected() {
        let err = SymmetricKey::from_encoded("0123456789abcdef0123456789abcd").unwrap_err();
        assert!(err.is_key_error());

        // 24 bytes once decoded
        let err = SymmetricKey::from_encoded("MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3").unwrap_err();
        assert!(matches!(err, CipherError::KeyLength(24)));

        let err = SymmetricKey::from_encoded("not base64 at all!").unwrap_err();
        assert!(matches!(err, CipherError::KeyEncoding(_)));
    }

    #[test]
    fn test_padding_lengths() {
        for len in 0..=64 {
            let data = vec![0xAB; len];
            let padded = pkcs7_pad(&data);
            assert_eq!(padded.len() % PAD_BLOCK_SIZE, 0);
            assert!(padded.len() > len);
            assert_eq!(pkcs7_unpad(&padded).unwrap(), data.as_slice());
        }
    }

    #[test]
    fn test_aligned_input_gets_full_pad_block() {
        let padded = pkcs7_pad(&[7u8; 32]);
        assert_eq!(padded.len(), 64);
        assert!(padded[32..].iter().all(|&b| b == 32));
    }

    #[test]
    fn test_envelope_layout() {
        let envelope = Envelope::with_nonce([1u8; 16], b"<xml/>".to_vec(), b"wxtest".to_vec());
        let encoded = envelope.encode();

        assert_eq!(&encoded[..16], &[1u8; 16]);
        assert_eq!(&encoded[16..20], &[0, 0, 0, 6]);
        assert_eq!(&encoded[20..26], b"<xml/>");
        assert_eq!(&encoded[26..], b"wxtest");
        assert_eq!(Envelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_length_prefix_overflow_rejected() {
        let mut buf = vec![0u8; 16];
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(b"short");

        let err = Envelope::decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            CipherError::LengthOverflow {
                declared: 100,
                available: 5
            }
        ));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let envelope = Envelope::new("hello \n 世界".as_bytes().to_vec(), b"wxtest".to_vec());

        let ciphertext = seal(&key, &envelope).unwrap();
        assert_eq!(ciphertext.len() % PAD_BLOCK_SIZE, 0);

        let opened = open(&key, &ciphertext).unwrap();
        assert_eq!(opened, envelope);
    }

    #[test]
    fn test_unaligned_ciphertext_rejected() {
        let key = test_key();
        assert!(matches!(
            open(&key, &[0u8; 15]),
            Err(CipherError::BlockAlignment(15))
        ));
        assert!(matches!(open(&key, &[]), Err(CipherError::BlockAlignment(0))));
    }

    #[test]
    fn test_invalid_base64_ciphertext() {
        let key = test_key();
        let err = open_base64(&key, "%%%").unwrap_err();
        assert!(matches!(err, CipherError::CiphertextEncoding(_)));
        assert!(matches!(WxkitError::from(err), WxkitError::Decryption(_)));
    }
}
