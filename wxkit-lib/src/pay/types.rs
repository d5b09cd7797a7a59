//! Request and response types for the payment API (v3).
//!
//! Field names follow the platform's JSON exactly. Optional fields are left
//! out of the serialized body when unset.

use serde::{Deserialize, Serialize};

use super::signer::PrepaySignature;

/// Order amount in the smallest currency unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Amount {
    /// Amount in CNY fen.
    pub fn cny(total: i64) -> Self {
        Self {
            total,
            currency: Some("CNY".to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub openid: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsDetail {
    pub merchant_goods_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wechatpay_goods_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goods_name: Option<String>,
    pub quantity: i64,
    pub unit_price: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goods_detail: Option<Vec<GoodsDetail>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub payer_client_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_info: Option<StoreInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_sharing: Option<bool>,
}

/// Body of the `/v3/pay/transactions/{jsapi,app,h5,native}` calls.
///
/// `appid` and `mchid` are filled in by the client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedOrderRequest {
    pub description: String,
    pub out_trade_no: String,
    pub notify_url: String,
    pub amount: Amount,
    /// Required for JSAPI and mini-program orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Payer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_expire: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attach: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goods_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_fapiao: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<OrderDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_info: Option<SceneInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_info: Option<SettleInfo>,
}

impl UnifiedOrderRequest {
    pub fn new(
        description: impl Into<String>,
        out_trade_no: impl Into<String>,
        notify_url: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            description: description.into(),
            out_trade_no: out_trade_no.into(),
            notify_url: notify_url.into(),
            amount,
            ..Default::default()
        }
    }

    pub fn with_payer(mut self, openid: impl Into<String>) -> Self {
        self.payer = Some(Payer {
            openid: openid.into(),
        });
        self
    }
}

/// Source account of a partial refund.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundFrom {
    pub account: String,
    pub amount: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundAmount {
    pub refund: i64,
    pub total: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Vec<RefundFrom>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundGoodsDetail {
    pub merchant_goods_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wechatpay_goods_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goods_name: Option<String>,
    pub unit_price: i64,
    pub refund_amount: i64,
    pub refund_quantity: i64,
}

/// Body of `/v3/refund/domestic/refunds`, for plain and combined orders.
///
/// `out_refund_no` is the caller's idempotency key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_trade_no: Option<String>,
    pub out_refund_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funds_account: Option<String>,
    pub amount: RefundAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goods_detail: Option<Vec<RefundGoodsDetail>>,
}

/// Where an abnormal refund is paid to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionRefundType {
    UserBankCard,
    MerchantBankCard,
}

/// Body of `/v3/refund/domestic/refunds/{refund_id}/apply-abnormal-refund`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRefundRequest {
    /// Goes into the path, not the body.
    #[serde(skip_serializing)]
    pub refund_id: String,
    pub out_refund_no: String,
    #[serde(rename = "type")]
    pub refund_type: ExceptionRefundType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineSceneInfo {
    pub payer_client_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineAmount {
    pub total_amount: i64,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineSubOrder {
    pub mchid: String,
    pub attach: String,
    pub amount: CombineAmount,
    pub out_trade_no: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_info: Option<SettleInfo>,
}

/// Body of `/v3/combine-transactions/{app,h5,jsapi,native}`.
///
/// `combine_appid` and `combine_mchid` default to the client's own ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineOrderRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combine_appid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combine_mchid: Option<String>,
    pub combine_out_trade_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_info: Option<CombineSceneInfo>,
    pub sub_orders: Vec<CombineSubOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combine_payer_info: Option<Payer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_expire: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineSubOrderRef {
    pub mchid: String,
    pub out_trade_no: String,
}

/// Body of `/v3/combine-transactions/out-trade-no/{no}/close`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCombineOrderRequest {
    /// Goes into the path, not the body.
    #[serde(skip_serializing)]
    pub combine_out_trade_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combine_appid: Option<String>,
    pub sub_orders: Vec<CombineSubOrderRef>,
}

/// Bill kinds accepted by the bill endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BillType {
    #[default]
    All,
    Success,
    Refund,
}

impl BillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Success => "SUCCESS",
            Self::Refund => "REFUND",
        }
    }
}

/// Compression of a downloaded bill when none is requested.
pub const DEFAULT_TAR_TYPE: &str = "GZIP";

/// Answer of the bill application endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillDownload {
    pub hash_type: String,
    pub hash_value: String,
    pub download_url: String,
}

/// Result of a JSAPI, mini-program or App order: the signed invocation
/// parameters plus the prepay id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepayInvocation {
    #[serde(flatten)]
    pub signature: PrepaySignature,
    pub prepay_id: String,
    #[serde(rename = "partnerId")]
    pub partner_id: String,
}

/// AEAD-encrypted certificate as returned by `/v3/certificates`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptCertificate {
    pub algorithm: String,
    pub nonce: String,
    pub associated_data: String,
    pub ciphertext: String,
}

/// Platform certificate with its PEM decrypted into `cert`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCertificate {
    pub serial_no: String,
    pub effective_time: String,
    pub expire_time: String,
    pub encrypt_certificate: EncryptCertificate,
    #[serde(default)]
    pub cert: String,
}

/// Encrypted `resource` block of a payment notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationResource {
    pub algorithm: String,
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_data: Option<String>,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
}

impl NotificationResource {
    /// The only algorithm the platform uses for notifications.
    pub const ALGORITHM: &'static str = "AEAD_AES_256_GCM";
}

/// Payment or refund notification posted to `notify_url`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub id: String,
    pub create_time: String,
    pub event_type: String,
    pub resource_type: String,
    pub resource: NotificationResource,
    #[serde(default)]
    pub summary: String,
}
