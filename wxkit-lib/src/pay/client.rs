//! Payment API client.
//!
//! Every request goes through an [`HttpTransport`] whose interceptor signs
//! it with the merchant key, so none of the operations below build an
//! `Authorization` header themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! use wxkit_lib::config::PayConfig;
//! use wxkit_lib::pay::{Amount, UnifiedOrderRequest, WxPayClient};
//!
//! let client = WxPayClient::new(
//!     PayConfig::new("1900000001", "wxd678efh567hg6787")
//!         .with_serial_no("5157F09EFDC096DE15EBE81A47057A7232F1B8E1")
//!         .with_private_key("/etc/wxkit/apiclient_key.pem"),
//! )?;
//!
//! let order = UnifiedOrderRequest::new("T-shirt", "20240101001", "https://example.com/notify", Amount::cny(100))
//!     .with_payer("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o");
//! let invocation = client.unified_order(&order).await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use super::signer::PaySigner;
use super::types::{
    BillDownload, BillType, CloseCombineOrderRequest, EncryptCertificate, ExceptionRefundRequest,
    PlatformCertificate, PrepayInvocation, DEFAULT_TAR_TYPE,
};
use crate::config::PayConfig;
use crate::transport::HttpTransport;
use crate::{Result, WxkitError};

#[cfg(feature = "http-client")]
use crate::transport::ReqwestTransport;

/// Client for one merchant account.
///
/// Clients share nothing, so several merchants can be served side by side.
pub struct WxPayClient {
    config: PayConfig,
    signer: Arc<PaySigner>,
    transport: Arc<dyn HttpTransport>,
}

impl WxPayClient {
    /// Create a client over a reqwest transport signed by this merchant's key.
    #[cfg(feature = "http-client")]
    pub fn new(config: PayConfig) -> Result<Self> {
        let signer = Arc::new(PaySigner::new(&config));
        let transport = ReqwestTransport::new(config.transport())?.with_interceptor(signer.clone());

        Ok(Self {
            config,
            signer,
            transport: Arc::new(transport),
        })
    }

    /// Create a client over a caller-supplied transport.
    ///
    /// The transport is responsible for attaching request signatures, for
    /// example by installing [`WxPayClient::signer`] as its interceptor.
    pub fn with_transport(config: PayConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let signer = Arc::new(PaySigner::new(&config));
        Self {
            config,
            signer,
            transport,
        }
    }

    pub fn config(&self) -> &PayConfig {
        &self.config
    }

    /// The signer used for prepay ids, callbacks and encrypted fields.
    pub fn signer(&self) -> &Arc<PaySigner> {
        &self.signer
    }

    fn order_defaults(&self) -> [(&str, &str); 2] {
        [
            ("appid", self.config.app_id.as_str()),
            ("mchid", self.config.merchant_id.as_str()),
        ]
    }

    fn combine_defaults(&self) -> [(&str, &str); 2] {
        [
            ("combine_appid", self.config.app_id.as_str()),
            ("combine_mchid", self.config.merchant_id.as_str()),
        ]
    }

    fn mchid_query(&self) -> [(&str, &str); 1] {
        [("mchid", self.config.merchant_id.as_str())]
    }

    async fn post_value(&self, path: &str, body: &Value) -> Result<Value> {
        self.transport.post(path, body).await?.value()
    }

    async fn get_value(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.transport.get(path, query).await?.value()
    }

    async fn prepay(
        &self,
        operation: &str,
        path: &str,
        body: &Value,
        with_package: bool,
    ) -> Result<PrepayInvocation> {
        let response = self.post_value(path, body).await?;
        let prepay_id = require_field(operation, response, "prepay_id")?;

        let signature = self.signer.sign_prepay_id(&prepay_id).await?;
        let signature = if with_package {
            signature
        } else {
            signature.without_package()
        };

        Ok(PrepayInvocation {
            signature,
            prepay_id,
            partner_id: self.config.merchant_id.clone(),
        })
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// JSAPI / mini-program order (`/v3/pay/transactions/jsapi`).
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order(&self, order: &impl Serialize) -> Result<PrepayInvocation> {
        let body = merge_defaults(&self.order_defaults(), order)?;
        self.prepay("unified_order", "/v3/pay/transactions/jsapi", &body, true)
            .await
    }

    /// App order (`/v3/pay/transactions/app`); the result carries no `package`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order_app(&self, order: &impl Serialize) -> Result<PrepayInvocation> {
        let body = merge_defaults(&self.order_defaults(), order)?;
        self.prepay("unified_order_app", "/v3/pay/transactions/app", &body, false)
            .await
    }

    /// H5 order, returning the `h5_url` to redirect the payer to.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order_h5(&self, order: &impl Serialize) -> Result<String> {
        let body = merge_defaults(&self.order_defaults(), order)?;
        let response = self.post_value("/v3/pay/transactions/h5", &body).await?;
        require_field("unified_order_h5", response, "h5_url")
    }

    /// Native order, returning the `code_url` to render as a QR code.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order_native(&self, order: &impl Serialize) -> Result<String> {
        let body = merge_defaults(&self.order_defaults(), order)?;
        let response = self.post_value("/v3/pay/transactions/native", &body).await?;
        require_field("unified_order_native", response, "code_url")
    }

    /// Query an order by platform transaction id.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn query_order(&self, transaction_id: &str) -> Result<Value> {
        let path = format!(
            "/v3/pay/transactions/id/{}",
            path_segment("transaction_id", transaction_id)?
        );
        self.get_value(&path, &self.mchid_query()).await
    }

    /// Query an order by merchant order number.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn query_order_by_out_trade_no(&self, out_trade_no: &str) -> Result<Value> {
        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}",
            path_segment("out_trade_no", out_trade_no)?
        );
        self.get_value(&path, &self.mchid_query()).await
    }

    /// Close an unpaid order. The platform answers `204` with no body.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn close_order(&self, out_trade_no: &str) -> Result<Value> {
        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}/close",
            path_segment("out_trade_no", out_trade_no)?
        );
        let body = serde_json::json!({ "mchid": self.config.merchant_id });
        self.post_value(&path, &body).await
    }

    // ========================================================================
    // Refunds
    // ========================================================================

    /// Request a refund; `out_refund_no` makes retries idempotent.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, request)))]
    pub async fn refund(&self, request: &impl Serialize) -> Result<Value> {
        let body = serde_json::to_value(request)?;
        self.post_value("/v3/refund/domestic/refunds", &body).await
    }

    /// Query a refund by merchant refund number.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn query_refund(&self, out_refund_no: &str) -> Result<Value> {
        let path = format!(
            "/v3/refund/domestic/refunds/{}",
            path_segment("out_refund_no", out_refund_no)?
        );
        self.get_value(&path, &self.mchid_query()).await
    }

    /// Re-route a refund that could not reach the payer's original account.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip(self, request), fields(refund_id = %request.refund_id))
    )]
    pub async fn exception_refund(&self, request: &ExceptionRefundRequest) -> Result<Value> {
        let path = format!(
            "/v3/refund/domestic/refunds/{}/apply-abnormal-refund",
            path_segment("refund_id", &request.refund_id)?
        );
        let body = serde_json::to_value(request)?;
        self.post_value(&path, &body).await
    }

    // ========================================================================
    // Bills
    // ========================================================================

    /// Apply for a trade bill; `bill_date` is `yyyy-MM-dd`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn apply_trade_bill(
        &self,
        bill_date: &str,
        bill_type: BillType,
        tar_type: Option<&str>,
    ) -> Result<BillDownload> {
        self.apply_bill("/v3/bill/tradebill", bill_date, bill_type, tar_type)
            .await
    }

    /// Apply for a fund flow bill; `bill_date` is `yyyy-MM-dd`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn apply_fund_bill(
        &self,
        bill_date: &str,
        bill_type: BillType,
        tar_type: Option<&str>,
    ) -> Result<BillDownload> {
        self.apply_bill("/v3/bill/fundflowbill", bill_date, bill_type, tar_type)
            .await
    }

    async fn apply_bill(
        &self,
        path: &str,
        bill_date: &str,
        bill_type: BillType,
        tar_type: Option<&str>,
    ) -> Result<BillDownload> {
        let query = [
            ("bill_date", bill_date),
            ("bill_type", bill_type.as_str()),
            ("tar_type", tar_type.unwrap_or(DEFAULT_TAR_TYPE)),
        ];
        self.transport.get(path, &query).await?.json()
    }

    /// Download a bill from the `download_url` returned by the apply calls.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, download_url)))]
    pub async fn download_bill(&self, download_url: &str) -> Result<Vec<u8>> {
        let path = relative_path(&self.config.base_url, download_url)?;
        Ok(self.transport.get(&path, &[]).await?.body)
    }

    // ========================================================================
    // Certificates
    // ========================================================================

    /// Fetch the platform certificates and decrypt each one.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn download_platform_certificates(&self) -> Result<Vec<PlatformCertificate>> {
        let response = self.get_value("/v3/certificates", &[]).await?;
        let Some(entries) = response.get("data").and_then(Value::as_array) else {
            return Err(WxkitError::upstream_rejection(
                "download_platform_certificates",
                response,
            ));
        };

        entries
            .iter()
            .map(|entry| -> Result<PlatformCertificate> {
                let mut certificate: PlatformCertificate = serde_json::from_value(entry.clone())?;
                let EncryptCertificate {
                    nonce,
                    associated_data,
                    ciphertext,
                    ..
                } = &certificate.encrypt_certificate;
                certificate.cert = self.signer.decrypt_field(nonce, associated_data, ciphertext)?;
                Ok(certificate)
            })
            .collect()
    }

    // ========================================================================
    // Combined orders
    // ========================================================================

    /// Combined App order; the result carries no `package`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order_app_combine(
        &self,
        order: &impl Serialize,
    ) -> Result<PrepayInvocation> {
        let body = merge_defaults(&self.combine_defaults(), order)?;
        self.prepay(
            "unified_order_app_combine",
            "/v3/combine-transactions/app",
            &body,
            false,
        )
        .await
    }

    /// Combined JSAPI / mini-program order.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order_jsapi_combine(
        &self,
        order: &impl Serialize,
    ) -> Result<PrepayInvocation> {
        let body = merge_defaults(&self.combine_defaults(), order)?;
        self.prepay(
            "unified_order_jsapi_combine",
            "/v3/combine-transactions/jsapi",
            &body,
            true,
        )
        .await
    }

    /// Combined H5 order, returning the `h5_url`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order_h5_combine(&self, order: &impl Serialize) -> Result<String> {
        let body = merge_defaults(&self.combine_defaults(), order)?;
        let response = self
            .post_value("/v3/combine-transactions/h5", &body)
            .await?;
        require_field("unified_order_h5_combine", response, "h5_url")
    }

    /// Combined Native order, returning the `code_url`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, order)))]
    pub async fn unified_order_native_combine(&self, order: &impl Serialize) -> Result<String> {
        let body = merge_defaults(&self.combine_defaults(), order)?;
        let response = self
            .post_value("/v3/combine-transactions/native", &body)
            .await?;
        require_field("unified_order_native_combine", response, "code_url")
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn query_combine_order(&self, combine_out_trade_no: &str) -> Result<Value> {
        let path = format!(
            "/v3/combine-transactions/out-trade-no/{}",
            path_segment("combine_out_trade_no", combine_out_trade_no)?
        );
        self.get_value(&path, &[]).await
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            skip(self, request),
            fields(combine_out_trade_no = %request.combine_out_trade_no)
        )
    )]
    pub async fn close_combine_order(&self, request: &CloseCombineOrderRequest) -> Result<Value> {
        let path = format!(
            "/v3/combine-transactions/out-trade-no/{}/close",
            path_segment("combine_out_trade_no", &request.combine_out_trade_no)?
        );
        let body = merge_defaults(&[("combine_appid", self.config.app_id.as_str())], request)?;
        self.post_value(&path, &body).await
    }

    /// Refund one sub-order of a combined order.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, request)))]
    pub async fn refund_combine_order(&self, request: &impl Serialize) -> Result<Value> {
        self.refund(request).await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn query_combine_refund(&self, out_refund_no: &str) -> Result<Value> {
        let path = format!(
            "/v3/refund/domestic/refunds/{}",
            path_segment("out_refund_no", out_refund_no)?
        );
        self.get_value(&path, &[]).await
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip(self, request), fields(refund_id = %request.refund_id))
    )]
    pub async fn exception_combine_refund(
        &self,
        request: &ExceptionRefundRequest,
    ) -> Result<Value> {
        self.exception_refund(request).await
    }
}

impl std::fmt::Debug for WxPayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WxPayClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Serialize `request` over `defaults`; fields set in `request` win.
fn merge_defaults(defaults: &[(&str, &str)], request: &impl Serialize) -> Result<Value> {
    let mut merged: Map<String, Value> = defaults
        .iter()
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect();

    match serde_json::to_value(request)? {
        Value::Object(fields) => merged.extend(fields),
        other => {
            return Err(WxkitError::invalid_data(
                "request",
                format!("expected a JSON object, got {}", other),
            ))
        }
    }

    Ok(Value::Object(merged))
}

/// Extract a non-empty string field, or reject with the whole response.
fn require_field(operation: &str, response: Value, field: &str) -> Result<String> {
    match response.get(field).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(WxkitError::upstream_rejection(operation, response)),
    }
}

/// Check an id before it is placed in a request path.
///
/// Ids are limited to the characters the platform accepts for merchant
/// numbers, none of which the URL layer re-encodes.
fn path_segment<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(WxkitError::invalid_data(field, "must not be empty"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '|' | '*' | '@')))
    {
        return Err(WxkitError::invalid_data(
            field,
            format!("character {:?} is not allowed in a path segment", bad),
        ));
    }
    Ok(value)
}

/// Path and query of `url` relative to `base_url`.
fn relative_path(base_url: &str, url: &str) -> Result<String> {
    if let Some(rest) = url.strip_prefix(base_url.trim_end_matches('/')) {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') {
            return Ok(rest.to_string());
        }
    }
    if url.starts_with('/') {
        return Ok(url.to_string());
    }

    let parsed =
        url::Url::parse(url).map_err(|e| WxkitError::invalid_data("download_url", e.to_string()))?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}
