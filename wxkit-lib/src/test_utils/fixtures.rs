//! Fixture keys and configurations.
//!
//! The merchant key, the platform public key and the platform certificate
//! share one RSA key pair, so anything the merchant key signs verifies
//! against the platform key.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::{KeySource, MessageConfig, PayConfig};

/// PKCS#8 merchant private key.
pub const MERCHANT_PRIVATE_KEY_PEM: &str = include_str!("../../tests/fixtures/apiclient_key.pem");

/// SPKI platform public key.
pub const PLATFORM_PUBLIC_KEY_PEM: &str =
    include_str!("../../tests/fixtures/platform_public_key.pem");

/// Self-signed platform certificate.
pub const PLATFORM_CERTIFICATE_PEM: &str = include_str!("../../tests/fixtures/platform_cert.pem");

pub const TEST_MERCHANT_ID: &str = "1900000001";
pub const TEST_APP_ID: &str = "wxd678efh567hg6787";
pub const TEST_SERIAL_NO: &str = "5157F09EFDC096DE15EBE81A47057A7232F1B8E1";
pub const TEST_API_V3_KEY: &str = "a7cde1ZJB1kG2e7VfTs3jQzaWizur8Gb";

/// `EncodingAESKey` decoding to bytes `0..32`.
pub const TEST_AES_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";
pub const TEST_TOKEN: &str = "testtoken";

/// Fully populated merchant configuration with inline keys.
pub fn test_pay_config() -> PayConfig {
    PayConfig::new(TEST_MERCHANT_ID, TEST_APP_ID)
        .with_serial_no(TEST_SERIAL_NO)
        .with_api_v3_key(TEST_API_V3_KEY)
        .with_private_key(KeySource::literal(MERCHANT_PRIVATE_KEY_PEM))
        .with_public_key(KeySource::literal(PLATFORM_PUBLIC_KEY_PEM))
}

pub fn test_message_config() -> MessageConfig {
    MessageConfig::new(TEST_APP_ID, TEST_TOKEN, TEST_AES_KEY)
}

/// Encrypt `plaintext` the way the platform encrypts certificates and
/// notification resources: base64 of ciphertext followed by the tag.
pub fn seal_field(api_v3_key: &str, nonce: &str, associated_data: &str, plaintext: &str) -> String {
    let cipher = Aes256Gcm::new_from_slice(api_v3_key.as_bytes()).expect("32-byte API v3 key");
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: plaintext.as_bytes(),
                aad: associated_data.as_bytes(),
            },
        )
        .expect("AES-GCM encryption");
    STANDARD.encode(sealed)
}
