//! Inbound message codec for the messaging callback.
//!
//! The platform posts XML whose `Encrypt` element carries an AES-256-CBC
//! [`Envelope`]; replies travel back the same way together with a SHA-1
//! `MsgSignature` computed by [`verify_signature`].
//!
//! # Example
//!
//! ```ignore
//! use wxkit_lib::{config::MessageConfig, message::MessageCodec};
//!
//! let codec = MessageCodec::new(&MessageConfig::new("wx123", "token", aes_key))?;
//! let xml = codec.open(&msg_signature, &timestamp, &nonce, &encrypt)?;
//! let reply = codec.encrypt_reply("<xml>...</xml>")?.to_xml()?;
//! ```

pub mod cipher;
pub mod xml;

pub use cipher::{CipherError, Envelope, SymmetricKey};
pub use xml::{object_to_xml, xml_to_object};

use rand::{distributions::Alphanumeric, Rng};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use crate::{config::MessageConfig, unix_timestamp, Result, WxkitError};

/// Length of the random nonce used by [`jsapi_ticket_signature`].
const JSAPI_NONCE_LEN: usize = 16;

fn sha1_hex(input: &[u8]) -> String {
    hex::encode(Sha1::digest(input))
}

/// SHA-1 hex over the sorted, concatenated inputs.
///
/// Inputs are sorted by byte order before hashing, so argument order does
/// not matter. Numeric strings therefore sort as text ("10" < "9").
pub fn verify_signature(token: &str, timestamp: &str, nonce: &str, encrypt: Option<&str>) -> String {
    let mut parts = vec![token, timestamp, nonce];
    if let Some(encrypt) = encrypt {
        parts.push(encrypt);
    }
    parts.sort_unstable();
    sha1_hex(parts.concat().as_bytes())
}

/// Decrypt an `Encrypt` payload and return the message body.
///
/// Every failure, including an undecodable key, is reported as
/// [`WxkitError::Decryption`].
pub fn decrypt(aes_key: &str, ciphertext: &str) -> Result<String> {
    let key = SymmetricKey::from_encoded(aes_key)
        .map_err(|e| WxkitError::Decryption(e.to_string()))?;
    open_body(&key, ciphertext)
}

/// [`decrypt`] followed by [`xml_to_object`].
pub fn decrypt_to_object(aes_key: &str, ciphertext: &str) -> Result<Map<String, Value>> {
    xml_to_object(&decrypt(aes_key, ciphertext)?)
}

/// Encrypt `xml` for the platform and return the reply document.
pub fn encrypt(app_id: &str, token: &str, aes_key: &str, xml: &str) -> Result<String> {
    encrypt_reply(app_id, token, aes_key, xml)?.to_xml()
}

/// Encrypt `xml` for the platform, returning the reply fields.
pub fn encrypt_reply(app_id: &str, token: &str, aes_key: &str, xml: &str) -> Result<EncryptedReply> {
    let key = SymmetricKey::from_encoded(aes_key)?;
    seal_reply(&key, app_id, token, xml)
}

fn open_body(key: &SymmetricKey, ciphertext: &str) -> Result<String> {
    let envelope = cipher::open_base64(key, ciphertext)
        .map_err(|e| WxkitError::Decryption(e.to_string()))?;
    String::from_utf8(envelope.body)
        .map_err(|e| WxkitError::Decryption(format!("message body is not UTF-8: {}", e)))
}

fn seal_reply(key: &SymmetricKey, app_id: &str, token: &str, xml: &str) -> Result<EncryptedReply> {
    let envelope = Envelope::new(xml.as_bytes(), app_id.as_bytes());
    let encrypt = cipher::seal_base64(key, &envelope)?;

    let nonce = rand::thread_rng()
        .gen_range(100_000_000u32..1_000_000_000)
        .to_string();
    let timestamp = unix_timestamp().to_string();
    let msg_signature = verify_signature(token, &timestamp, &nonce, Some(&encrypt));

    Ok(EncryptedReply {
        encrypt,
        msg_signature,
        timestamp,
        nonce,
    })
}

/// Fields of an encrypted reply document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedReply {
    pub encrypt: String,
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl EncryptedReply {
    /// Render as `<xml><Encrypt/><MsgSignature/><TimeStamp/><Nonce/></xml>`.
    pub fn to_xml(&self) -> Result<String> {
        let mut fields = Map::new();
        fields.insert("Encrypt".into(), Value::String(self.encrypt.clone()));
        fields.insert("MsgSignature".into(), Value::String(self.msg_signature.clone()));
        fields.insert("TimeStamp".into(), Value::String(self.timestamp.clone()));
        fields.insert("Nonce".into(), Value::String(self.nonce.clone()));

        let mut root = Map::new();
        root.insert("xml".into(), Value::Object(fields));
        object_to_xml(&root)
    }

    /// Parse a reply document produced by [`EncryptedReply::to_xml`].
    pub fn from_xml(xml: &str) -> Result<Self> {
        let parsed = xml_to_object(xml)?;
        let fields = parsed
            .get("xml")
            .and_then(Value::as_object)
            .ok_or_else(|| WxkitError::invalid_data("xml", "missing <xml> root"))?;

        let field = |name: &str| -> Result<String> {
            fields
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| WxkitError::invalid_data(name, "missing from reply"))
        };

        Ok(Self {
            encrypt: field("Encrypt")?,
            msg_signature: field("MsgSignature")?,
            timestamp: field("TimeStamp")?,
            nonce: field("Nonce")?,
        })
    }
}

/// Pull the `Encrypt` element out of an inbound callback document.
pub fn extract_encrypt(xml: &str) -> Result<String> {
    let parsed = xml_to_object(xml)?;
    parsed
        .get("xml")
        .and_then(|root| root.get("Encrypt"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WxkitError::invalid_data("Encrypt", "missing from callback document"))
}

/// Message codec bound to one account's token and AES key.
#[derive(Clone)]
pub struct MessageCodec {
    app_id: String,
    token: String,
    key: SymmetricKey,
}

impl MessageCodec {
    /// Build a codec, decoding the AES key up front.
    ///
    /// A key that does not decode to 32 bytes is a configuration error.
    pub fn new(config: &MessageConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(WxkitError::configuration("token", "must not be empty"));
        }
        let key = SymmetricKey::from_encoded(&config.aes_key)?;
        Ok(Self {
            app_id: config.app_id.clone(),
            token: config.token.clone(),
            key,
        })
    }

    /// The account this codec encrypts for.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Signature over this codec's token and the given fields.
    pub fn signature(&self, timestamp: &str, nonce: &str, encrypt: Option<&str>) -> String {
        verify_signature(&self.token, timestamp, nonce, encrypt)
    }

    /// Compare a platform-supplied signature in constant time.
    pub fn verify(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypt: Option<&str>,
    ) -> bool {
        let expected = self.signature(timestamp, nonce, encrypt);
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }

    /// Verify `msg_signature`, then decrypt `encrypt`.
    pub fn open(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypt: &str,
    ) -> Result<String> {
        if !self.verify(msg_signature, timestamp, nonce, Some(encrypt)) {
            return Err(WxkitError::Authentication(
                "message signature mismatch".to_string(),
            ));
        }
        self.decrypt(encrypt)
    }

    /// [`MessageCodec::open`] followed by [`xml_to_object`].
    pub fn open_to_object(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypt: &str,
    ) -> Result<Map<String, Value>> {
        xml_to_object(&self.open(msg_signature, timestamp, nonce, encrypt)?)
    }

    /// Decrypt without checking a signature.
    pub fn decrypt(&self, encrypt: &str) -> Result<String> {
        open_body(&self.key, encrypt)
    }

    pub fn decrypt_to_object(&self, encrypt: &str) -> Result<Map<String, Value>> {
        xml_to_object(&self.decrypt(encrypt)?)
    }

    /// Encrypt and sign a reply.
    pub fn encrypt_reply(&self, xml: &str) -> Result<EncryptedReply> {
        seal_reply(&self.key, &self.app_id, &self.token, xml)
    }
}

impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec")
            .field("app_id", &self.app_id)
            .field("token", &"<redacted>")
            .field("key", &self.key)
            .finish()
    }
}

/// Signature handed to the JS-SDK `wx.config` call.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct JsapiSignature {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

/// SHA-1 hex over `jsapi_ticket=..&noncestr=..&timestamp=..&url=..`.
///
/// `url` must exclude the fragment.
pub fn sign_jsapi_ticket(ticket: &str, nonce: &str, timestamp: &str, url: &str) -> String {
    let plain = format!(
        "jsapi_ticket={}&noncestr={}&timestamp={}&url={}",
        ticket, nonce, timestamp, url
    );
    sha1_hex(plain.as_bytes())
}

/// Sign a page URL with a fresh nonce and the current time.
pub fn jsapi_ticket_signature(ticket: &str, url: &str) -> JsapiSignature {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(JSAPI_NONCE_LEN)
        .map(char::from)
        .collect();
    let timestamp = unix_timestamp().to_string();
    let signature = sign_jsapi_ticket(ticket, &nonce, &timestamp, url);

    JsapiSignature {
        timestamp,
        nonce,
        signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_message_config, TEST_AES_KEY, TEST_APP_ID, TEST_TOKEN};

    const KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";

    fn codec() -> MessageCodec {
        MessageCodec::new(&MessageConfig::new("wxtest", "testtoken", KEY)).unwrap()
    }

    #[test]
    fn test_signature_known_vector() {
        assert_eq!(
            verify_signature("testtoken", "1409304348", "xxxxxx", None),
            "30d7c91db269b3e0cb3e1a131646b6d1ae4750f5"
        );
    }

    #[test]
    fn test_signature_ignores_argument_order() {
        let a = verify_signature("token", "1409304348", "nonce", Some("cipher"));
        let b = verify_signature("cipher", "nonce", "token", Some("1409304348"));
        assert_eq!(a, b);
        assert_ne!(a, verify_signature("token", "1409304349", "nonce", Some("cipher")));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let xml = "<xml><Content><![CDATA[你好\n]]></Content></xml>";
        let reply = encrypt_reply("wxtest", "testtoken", KEY, xml).unwrap();

        assert_eq!(reply.nonce.len(), 9);
        assert_eq!(decrypt(KEY, &reply.encrypt).unwrap(), xml);
        assert_eq!(
            reply.msg_signature,
            verify_signature("testtoken", &reply.timestamp, &reply.nonce, Some(&reply.encrypt))
        );
    }

    #[test]
    fn test_reply_xml_roundtrip() {
        let document = encrypt("wxtest", "testtoken", KEY, "<xml/>").unwrap();
        assert!(document.starts_with("<xml>"));

        let reply = EncryptedReply::from_xml(&document).unwrap();
        assert_eq!(extract_encrypt(&document).unwrap(), reply.encrypt);
        assert_eq!(decrypt(KEY, &reply.encrypt).unwrap(), "<xml/>");
    }

    #[test]
    fn test_decrypt_key_error_is_decryption() {
        let err = decrypt("short", "AAAA").unwrap_err();
        assert!(matches!(err, WxkitError::Decryption(_)));
    }

    #[test]
    fn test_encrypt_key_error_is_configuration() {
        let err = encrypt("wxtest", "testtoken", "0123456789abcdef0123456789abcd", "<xml/>")
            .unwrap_err();
        assert!(matches!(err, WxkitError::Configuration { .. }));
    }

    #[test]
    fn test_codec_open_checks_signature() {
        let codec = codec();
        let reply = codec.encrypt_reply("<xml><A>1</A></xml>").unwrap();

        let opened = codec
            .open(&reply.msg_signature, &reply.timestamp, &reply.nonce, &reply.encrypt)
            .unwrap();
        assert_eq!(opened, "<xml><A>1</A></xml>");

        let err = codec
            .open("0000", &reply.timestamp, &reply.nonce, &reply.encrypt)
            .unwrap_err();
        assert!(matches!(err, WxkitError::Authentication(_)));
    }

    #[test]
    fn test_codec_open_to_object() {
        let codec = codec();
        let reply = codec.encrypt_reply("<xml><MsgType>text</MsgType></xml>").unwrap();
        let obj = codec
            .open_to_object(&reply.msg_signature, &reply.timestamp, &reply.nonce, &reply.encrypt)
            .unwrap();
        assert_eq!(obj["xml"]["MsgType"], "text");
    }

    #[test]
    fn test_codec_rejects_bad_config() {
        let err = MessageCodec::new(&MessageConfig::new("wxtest", "testtoken", "abc")).unwrap_err();
        assert!(matches!(err, WxkitError::Configuration { .. }));

        let err = MessageCodec::new(&MessageConfig::new("wxtest", "", KEY)).unwrap_err();
        assert!(matches!(err, WxkitError::Configuration { .. }));
    }

    #[test]
    fn test_fixture_config_builds_codec() {
        let codec = MessageCodec::new(&test_message_config()).unwrap();
        assert_eq!(codec.app_id(), TEST_APP_ID);

        let reply = codec.encrypt_reply("<xml><A>1</A></xml>").unwrap();
        assert_eq!(
            decrypt(TEST_AES_KEY, &reply.encrypt).unwrap(),
            "<xml><A>1</A></xml>"
        );
        assert_eq!(
            verify_signature(TEST_TOKEN, &reply.timestamp, &reply.nonce, Some(reply.encrypt.as_str())),
            reply.msg_signature
        );
    }

    #[test]
    fn test_jsapi_known_vector() {
        let signature = sign_jsapi_ticket(
            "sM4AOVdWfPE4DxkXGEs8VMCPGGVi4C3VM0P37wVUCFvkVAy_90u5h9nbSlYy3-Sl-HhTdfl2fzFy1AOcHKP7qg",
            "Wm3WZYTPz0wzccnW",
            "1414587457",
            "http://mp.weixin.qq.com?params=value",
        );
        assert_eq!(signature, "0f9de62fce790f9a083d5c99e95740ceb90c27ed");
    }

    #[test]
    fn test_jsapi_signature_is_reproducible() {
        let signed = jsapi_ticket_signature("ticket", "https://example.com/page");
        assert_eq!(signed.nonce.len(), JSAPI_NONCE_LEN);
        assert_eq!(
            signed.signature,
            sign_jsapi_ticket("ticket", &signed.nonce, &signed.timestamp, "https://example.com/page")
        );
    }
}
