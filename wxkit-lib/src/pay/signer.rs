//! Request signing and callback verification for the payment API (v3).
//!
//! # Canonical String
//!
//! Every signature is computed over newline-terminated fields:
//!
//! ```text
//! GET\n/v3/certificates\n1554208460\n593BEC0C93\n\n
//! POST\n/v3/pay/transactions/jsapi\n1554208460\n593BEC0C93\n{"appid":"wx..."}\n
//! ```
//!
//! The body line is always present; it is empty when the request has no
//! body. Signatures are RSA-SHA256 (PKCS#1 v1.5), base64 encoded.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{distributions::Alphanumeric, Rng};
use rsa::{
    pkcs1v15::Signature,
    signature::{SignatureEncoding, Signer, Verifier},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::KeyStore;
use super::types::NotificationResource;
use crate::config::PayConfig;
use crate::transport::{OutboundRequest, RequestInterceptor};
use crate::{unix_timestamp, Result, WxkitError};

/// Scheme tag of the `Authorization` header.
pub const AUTH_SCHEME: &str = "WECHATPAY2-SHA256-RSA2048";

/// Length of generated request nonces.
pub const NONCE_LEN: usize = 10;

/// AES-256-GCM nonce length required by [`PaySigner::decrypt_field`].
pub const GCM_NONCE_SIZE: usize = 12;

/// AES-256-GCM tag length; the tag trails the ciphertext.
pub const GCM_TAG_SIZE: usize = 16;

const API_V3_KEY_SIZE: usize = 32;

/// Build the string a request signature is computed over.
pub fn build_canonical_string(
    method: &str,
    url: &str,
    timestamp: u64,
    nonce: &str,
    body: Option<&str>,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n",
        method,
        url,
        timestamp,
        nonce,
        body.unwrap_or("")
    )
}

/// Random alphanumeric request nonce.
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// Parameters for a client-side payment invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepaySignature {
    pub time_stamp: String,
    pub nonce_str: String,
    pub pay_sign: String,
    /// `prepay_id=<id>`; `None` for channels that do not take it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

impl PrepaySignature {
    /// Drop `package` for the App channel.
    pub fn without_package(mut self) -> Self {
        self.package = None;
        self
    }
}

/// Signs outbound payment requests and authenticates platform responses.
///
/// Key material is read on first use and cached for the life of the signer.
pub struct PaySigner {
    merchant_id: String,
    app_id: String,
    serial_no: String,
    api_v3_key: Zeroizing<String>,
    keys: KeyStore,
}

impl PaySigner {
    pub fn new(config: &PayConfig) -> Self {
        Self {
            merchant_id: config.merchant_id.clone(),
            app_id: config.app_id.clone(),
            serial_no: config.serial_no.clone(),
            api_v3_key: Zeroizing::new(config.api_v3_key.clone()),
            keys: KeyStore::new(config.private_key.clone(), config.public_key.clone()),
        }
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Sign `message` with the merchant key, base64 encoded.
    pub async fn sign(&self, message: &str) -> Result<String> {
        let key = self.keys.signing_key().await?;
        let signature = key
            .try_sign(message.as_bytes())
            .map_err(|e| WxkitError::configuration("private_key", e.to_string()))?;
        Ok(STANDARD.encode(signature.to_vec()))
    }

    /// Check a base64 signature against the platform key.
    ///
    /// A signature that fails to decode is reported as `false`; only
    /// unusable key material is an error.
    pub async fn verify(&self, message: &str, signature: &str) -> Result<bool> {
        let key = self.keys.verifying_key().await?;

        let Ok(raw) = STANDARD.decode(signature.trim()) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::try_from(raw.as_slice()) else {
            return Ok(false);
        };

        Ok(key.verify(message.as_bytes(), &signature).is_ok())
    }

    /// `Authorization` header for a request, with a fresh timestamp and nonce.
    pub async fn sign_authorization_header(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
    ) -> Result<String> {
        self.sign_authorization_header_at(method, url, body, unix_timestamp(), &generate_nonce())
            .await
    }

    /// `Authorization` header for a request with a caller-chosen timestamp
    /// and nonce.
    pub async fn sign_authorization_header_at(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
        timestamp: u64,
        nonce: &str,
    ) -> Result<String> {
        let canonical = build_canonical_string(method, url, timestamp, nonce, body);
        let signature = self.sign(&canonical).await?;

        Ok(format!(
            "{} mchid=\"{}\",nonce_str=\"{}\",serial_no=\"{}\",timestamp=\"{}\",signature=\"{}\"",
            AUTH_SCHEME, self.merchant_id, nonce, self.serial_no, timestamp, signature
        ))
    }

    /// Sign a prepay id for JSAPI, mini-program or App invocation.
    pub async fn sign_prepay_id(&self, prepay_id: &str) -> Result<PrepaySignature> {
        self.sign_prepay_id_at(prepay_id, unix_timestamp(), &generate_nonce())
            .await
    }

    pub async fn sign_prepay_id_at(
        &self,
        prepay_id: &str,
        timestamp: u64,
        nonce: &str,
    ) -> Result<PrepaySignature> {
        let package = format!("prepay_id={}", prepay_id);
        let message = format!("{}\n{}\n{}\n{}\n", self.app_id, timestamp, nonce, package);
        let pay_sign = self.sign(&message).await?;

        Ok(PrepaySignature {
            time_stamp: timestamp.to_string(),
            nonce_str: nonce.to_string(),
            pay_sign,
            package: Some(package),
        })
    }

    /// Verify a callback signature over `timestamp`, `nonce`, `signature`
    /// and the raw `body`, each newline terminated.
    pub async fn verify_callback_signature(
        &self,
        timestamp: &str,
        nonce: &str,
        signature: &str,
        body: &str,
    ) -> Result<bool> {
        let message = format!("{}\n{}\n{}\n{}\n", timestamp, nonce, signature, body);
        self.verify(&message, signature).await
    }

    /// Verify a notification signed over `timestamp`, `nonce` and the raw
    /// `body`, each newline terminated, as sent in the `Wechatpay-*` headers.
    pub async fn verify_notification_signature(
        &self,
        timestamp: &str,
        nonce: &str,
        signature: &str,
        body: &str,
    ) -> Result<bool> {
        let message = format!("{}\n{}\n{}\n", timestamp, nonce, body);
        self.verify(&message, signature).await
    }

    /// [`PaySigner::verify_callback_signature`] for an already parsed body,
    /// re-serialized compactly.
    pub async fn verify_callback_signature_json(
        &self,
        timestamp: &str,
        nonce: &str,
        signature: &str,
        body: &serde_json::Value,
    ) -> Result<bool> {
        let body = serde_json::to_string(body)?;
        self.verify_callback_signature(timestamp, nonce, signature, &body)
            .await
    }

    /// Decrypt an AEAD_AES_256_GCM field with the API v3 key.
    ///
    /// `ciphertext` is base64 of the encrypted bytes followed by the 16-byte
    /// tag. A tag mismatch is [`WxkitError::Authentication`].
    pub fn decrypt_field(
        &self,
        nonce: &str,
        associated_data: &str,
        ciphertext: &str,
    ) -> Result<String> {
        let key = self.api_v3_key.as_bytes();
        if key.is_empty() {
            return Err(WxkitError::configuration("api_v3_key", "not configured"));
        }
        if key.len() != API_V3_KEY_SIZE {
            return Err(WxkitError::configuration(
                "api_v3_key",
                format!("must be {} bytes, got {}", API_V3_KEY_SIZE, key.len()),
            ));
        }
        if nonce.len() != GCM_NONCE_SIZE {
            return Err(WxkitError::Decryption(format!(
                "nonce must be {} bytes, got {}",
                GCM_NONCE_SIZE,
                nonce.len()
            )));
        }

        let data = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| WxkitError::Decryption(format!("ciphertext is not valid base64: {}", e)))?;
        if data.len() < GCM_TAG_SIZE {
            return Err(WxkitError::Decryption(format!(
                "ciphertext of {} bytes is shorter than the tag",
                data.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| WxkitError::configuration("api_v3_key", e.to_string()))?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: &data,
                    aad: associated_data.as_bytes(),
                },
            )
            .map_err(|_| WxkitError::Authentication("AEAD tag mismatch".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| WxkitError::Decryption(format!("plaintext is not UTF-8: {}", e)))
    }

    /// Decrypt the `resource` block of a payment notification to JSON.
    pub fn decrypt_resource(&self, resource: &NotificationResource) -> Result<serde_json::Value> {
        if resource.algorithm != NotificationResource::ALGORITHM {
            return Err(WxkitError::invalid_data(
                "algorithm",
                format!("unsupported algorithm {}", resource.algorithm),
            ));
        }
        let plaintext = self.decrypt_field(
            &resource.nonce,
            resource.associated_data.as_deref().unwrap_or(""),
            &resource.ciphertext,
        )?;
        Ok(serde_json::from_str(&plaintext)?)
    }
}

impl std::fmt::Debug for PaySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaySigner")
            .field("merchant_id", &self.merchant_id)
            .field("app_id", &self.app_id)
            .field("serial_no", &self.serial_no)
            .field("keys", &self.keys)
            .finish()
    }
}

#[async_trait]
impl RequestInterceptor for PaySigner {
    async fn intercept(&self, request: &OutboundRequest) -> Result<Vec<(String, String)>> {
        let header = self
            .sign_authorization_header(
                request.method.as_str(),
                &request.url,
                request.body.as_deref(),
            )
            .await?;

        Ok(vec![
            ("Authorization".to_string(), header),
            ("Accept".to_string(), "application/json".to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{seal_field, test_pay_config, TEST_API_V3_KEY};
    use crate::transport::HttpMethod;

    fn signer() -> PaySigner {
        PaySigner::new(&test_pay_config())
    }

    #[test]
    fn test_canonical_string_layout() {
        assert_eq!(
            build_canonical_string("GET", "/v3/certificates", 1554208460, "593BEC0C93", None),
            "GET\n/v3/certificates\n1554208460\n593BEC0C93\n\n"
        );
        assert_eq!(
            build_canonical_string("POST", "/v3/refund", 1, "n", Some("{}")),
            "POST\n/v3/refund\n1\nn\n{}\n"
        );
    }

    #[test]
    fn test_nonce_shape() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_sign_then_verify() {
        let signer = signer();
        let signature = signer.sign("hello").await.unwrap();

        assert!(signer.verify("hello", &signature).await.unwrap());
        assert!(!signer.verify("hellp", &signature).await.unwrap());
        assert!(!signer.verify("hello", "%%%").await.unwrap());
        assert!(!signer.verify("hello", "AAAA").await.unwrap());
    }

    #[tokio::test]
    async fn test_authorization_header_format() {
        let signer = signer();
        let header = signer
            .sign_authorization_header_at("GET", "/v3/certificates", None, 1554208460, "593BEC0C93")
            .await
            .unwrap();

        assert!(header.starts_with("WECHATPAY2-SHA256-RSA2048 mchid=\"1900000001\","));
        assert!(header.contains("nonce_str=\"593BEC0C93\""));
        assert!(header.contains("serial_no=\"5157F09EFDC096DE15EBE81A47057A7232F1B8E1\""));
        assert!(header.contains("timestamp=\"1554208460\""));

        let signature = header
            .split("signature=\"")
            .nth(1)
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap();
        let canonical =
            build_canonical_string("GET", "/v3/certificates", 1554208460, "593BEC0C93", None);
        assert!(signer.verify(&canonical, signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_prepay_signature() {
        let signer = signer();
        let signed = signer
            .sign_prepay_id_at("wx201410272009395522657a690389285100", 1414561699, "5K8264ILTK")
            .await
            .unwrap();

        assert_eq!(
            signed.package.as_deref(),
            Some("prepay_id=wx201410272009395522657a690389285100")
        );
        let message = "wxd678efh567hg6787\n1414561699\n5K8264ILTK\nprepay_id=wx201410272009395522657a690389285100\n";
        assert!(signer.verify(message, &signed.pay_sign).await.unwrap());

        let json = serde_json::to_value(signed.clone().without_package()).unwrap();
        assert!(json.get("package").is_none());
        assert_eq!(json["timeStamp"], "1414561699");
        assert!(json.get("paySign").is_some());
    }

    #[tokio::test]
    async fn test_callback_signature_mismatch_is_false() {
        let signer = signer();
        let body = r#"{"id":"EV-2018022511223320873","event_type":"TRANSACTION.SUCCESS"}"#;
        let signature = signer.sign("unrelated").await.unwrap();

        assert!(!signer
            .verify_callback_signature("1554209980", "c5ac7061fccab6bf3e254dcf98995b8c", &signature, body)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_callback_signature_needs_public_key() {
        let config = test_pay_config().with_public_key("");
        let signer = PaySigner::new(&config);
        let err = signer
            .verify_callback_signature("1", "n", "AAAA", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, WxkitError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_notification_signature() {
        let signer = signer();
        let body = r#"{"id":"EV-2018022511223320873","event_type":"TRANSACTION.SUCCESS"}"#;
        let signature = signer
            .sign(&format!("1554209980\nc5ac7061fccab6bf3e254dcf98995b8c\n{}\n", body))
            .await
            .unwrap();

        assert!(signer
            .verify_notification_signature("1554209980", "c5ac7061fccab6bf3e254dcf98995b8c", &signature, body)
            .await
            .unwrap());
        assert!(!signer
            .verify_notification_signature("1554209981", "c5ac7061fccab6bf3e254dcf98995b8c", &signature, body)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_callback_json_body_is_compacted() {
        let signer = signer();
        let value: serde_json::Value =
            serde_json::from_str(r#"{ "id": "EV-1", "resource_type": "encrypt-resource" }"#).unwrap();

        let a = signer
            .verify_callback_signature_json("1", "n", "AAAA", &value)
            .await
            .unwrap();
        let b = signer
            .verify_callback_signature("1", "n", "AAAA", r#"{"id":"EV-1","resource_type":"encrypt-resource"}"#)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decrypt_field_roundtrip_and_tamper() {
        let signer = signer();
        let sealed = seal_field(TEST_API_V3_KEY, "0123456789ab", "certificate", "-----BEGIN CERT-----");

        assert_eq!(
            signer
                .decrypt_field("0123456789ab", "certificate", &sealed)
                .unwrap(),
            "-----BEGIN CERT-----"
        );

        let err = signer
            .decrypt_field("0123456789ab", "certificatE", &sealed)
            .unwrap_err();
        assert!(matches!(err, WxkitError::Authentication(_)));
    }

    #[test]
    fn test_decrypt_field_input_errors() {
        let signer = signer();

        let err = signer.decrypt_field("short", "", "AAAA").unwrap_err();
        assert!(matches!(err, WxkitError::Decryption(_)));

        let err = signer.decrypt_field("0123456789ab", "", "%%%").unwrap_err();
        assert!(matches!(err, WxkitError::Decryption(_)));

        let err = signer.decrypt_field("0123456789ab", "", "AAAA").unwrap_err();
        assert!(matches!(err, WxkitError::Decryption(_)));

        let unkeyed = PaySigner::new(&test_pay_config().with_api_v3_key(""));
        let err = unkeyed.decrypt_field("0123456789ab", "", "AAAA").unwrap_err();
        assert!(matches!(err, WxkitError::Configuration { .. }));

        let short_key = PaySigner::new(&test_pay_config().with_api_v3_key("too-short"));
        let err = short_key.decrypt_field("0123456789ab", "", "AAAA").unwrap_err();
        assert!(matches!(err, WxkitError::Configuration { .. }));
    }

    #[test]
    fn test_decrypt_resource() {
        let signer = signer();
        let resource = NotificationResource {
            algorithm: "AEAD_AES_256_GCM".to_string(),
            ciphertext: seal_field(
                TEST_API_V3_KEY,
                "fdasflkja484",
                "transaction",
                r#"{"out_trade_no":"1217752501201407033233368018","trade_state":"SUCCESS"}"#,
            ),
            associated_data: Some("transaction".to_string()),
            nonce: "fdasflkja484".to_string(),
            original_type: Some("transaction".to_string()),
        };

        let decrypted = signer.decrypt_resource(&resource).unwrap();
        assert_eq!(decrypted["trade_state"], "SUCCESS");

        let mut other = resource.clone();
        other.algorithm = "AEAD_SM4_GCM".to_string();
        assert!(matches!(
            signer.decrypt_resource(&other),
            Err(WxkitError::InvalidData { .. })
        ));
    }

    #[tokio::test]
    async fn test_interceptor_signs_exact_request() {
        let signer = signer();
        let request = OutboundRequest {
            method: HttpMethod::Post,
            url: "/v3/pay/transactions/jsapi".to_string(),
            body: Some(r#"{"appid":"wxd678efh567hg6787"}"#.to_string()),
        };

        let headers = signer.intercept(&request).await.unwrap();
        let (name, value) = &headers[0];
        assert_eq!(name, "Authorization");
        assert!(value.starts_with(AUTH_SCHEME));
    }

    #[tokio::test]
    async fn test_missing_private_key_is_configuration_error() {
        let signer = PaySigner::new(&crate::config::PayConfig::new("1900000001", "wx1"));
        let err = signer.sign("x").await.unwrap_err();
        assert!(matches!(err, WxkitError::Configuration { .. }));
    }
}
