//! Raw CLOB HTTP client
//!
//! Talks to the CLOB auth and order endpoints directly with reqwest:
//! L1 authentication signs an EIP-712 `ClobAuth` attestation with the
//! wallet key, L2 authentication signs each request with the derived
//! API secret (HMAC-SHA256). Secrets arrive in whichever base64 variant
//! the exchange felt like, so decoding tries standard, url-safe, and
//! unpadded url-safe in that order.

use crate::auth::{ApiKeyCreds, AuthApi, ErrorInfo, L1AuthIdentity, OrderIdentity};
use crate::types::OrderSide;
use alloy::primitives::{keccak256, Address, U256};
use alloy::signers::{local::PrivateKeySigner, Signer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";
const CLOB_AUTH_DOMAIN_NAME: &str = "ClobAuth";
const CLOB_AUTH_DOMAIN_VERSION: &str = "1";

/// Transport/rate-limit failures worth one more try on order submission
const ORDER_SUBMIT_RETRIES: u32 = 2;
const ORDER_RETRY_DELAY_MS: u64 = 500;

/// A strategy's order intent
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    /// Number of outcome shares
    pub size: Decimal,
}

/// What the CLOB said about a submitted order
#[derive(Debug, Clone, Deserialize)]
pub struct OrderReceipt {
    #[serde(default, alias = "orderID")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Order submission seam for strategies; mocked in tests
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;
}

/// Seam the reauthenticating gateway drives: signed submission that
/// preserves the rejection status, plus session reinstall after a
/// mid-run re-derivation.
#[async_trait]
pub trait SessionApi: AuthApi {
    async fn submit_signed(&self, request: &OrderRequest) -> Result<OrderReceipt, ErrorInfo>;
    async fn install_session(&self, creds: ApiKeyCreds, order_identity: OrderIdentity);
}

/// Authenticated session state set once derivation succeeds
#[derive(Debug, Clone)]
struct Session {
    creds: ApiKeyCreds,
    order_identity: OrderIdentity,
}

/// CLOB client over raw HTTP
pub struct ClobClient {
    http: reqwest::Client,
    host: String,
    chain_id: u64,
    signer: PrivateKeySigner,
    session: RwLock<Option<Session>>,
}

impl ClobClient {
    pub fn new(host: &str, chain_id: u64, signer: PrivateKeySigner) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            chain_id,
            signer,
            session: RwLock::new(None),
        })
    }

    pub fn signer_address(&self) -> String {
        format!("{:?}", self.signer.address())
    }

    /// Install the credentials every later signed call uses
    pub async fn set_session(&self, creds: ApiKeyCreds, order_identity: OrderIdentity) {
        *self.session.write().await = Some(Session {
            creds,
            order_identity,
        });
    }

    /// EIP-712 signing hash for the ClobAuth attestation.
    /// Domain omits verifyingContract: (name, version, chainId) only.
    fn clob_auth_hash(&self, address: &Address, timestamp: &str, nonce: u64) -> [u8; 32] {
        let domain_type_hash =
            keccak256(b"EIP712Domain(string name,string version,uint256 chainId)");
        let mut domain_data = Vec::with_capacity(128);
        domain_data.extend_from_slice(domain_type_hash.as_slice());
        domain_data.extend_from_slice(keccak256(CLOB_AUTH_DOMAIN_NAME.as_bytes()).as_slice());
        domain_data.extend_from_slice(keccak256(CLOB_AUTH_DOMAIN_VERSION.as_bytes()).as_slice());
        domain_data.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        let domain_separator = keccak256(&domain_data);

        let struct_type_hash = keccak256(
            b"ClobAuth(address address,string timestamp,uint256 nonce,string message)",
        );
        let mut struct_data = Vec::with_capacity(160);
        struct_data.extend_from_slice(struct_type_hash.as_slice());
        let mut addr_padded = [0u8; 32];
        addr_padded[12..].copy_from_slice(address.as_slice());
        struct_data.extend_from_slice(&addr_padded);
        struct_data.extend_from_slice(keccak256(timestamp.as_bytes()).as_slice());
        struct_data.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
        struct_data.extend_from_slice(keccak256(CLOB_AUTH_MESSAGE.as_bytes()).as_slice());
        let struct_hash = keccak256(&struct_data);

        let mut signing_input = Vec::with_capacity(66);
        signing_input.push(0x19);
        signing_input.push(0x01);
        signing_input.extend_from_slice(domain_separator.as_slice());
        signing_input.extend_from_slice(struct_hash.as_slice());
        keccak256(&signing_input).0
    }

    /// Build the POLY_* L1 headers for the given auth address
    async fn l1_headers(&self, l1: &L1AuthIdentity) -> Result<Vec<(&'static str, String)>, ErrorInfo> {
        let address: Address = l1
            .l1_auth_address
            .parse()
            .map_err(|e| ErrorInfo::other(format!("Invalid L1 auth address: {}", e)))?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let nonce = 0u64;

        let hash = self.clob_auth_hash(&address, &timestamp, nonce);
        let sig = self
            .signer
            .sign_hash(&hash.into())
            .await
            .map_err(|e| ErrorInfo::other(format!("Signing failed: {}", e)))?;

        Ok(vec![
            ("POLY_ADDRESS", l1.l1_auth_address.clone()),
            ("POLY_SIGNATURE", format!("0x{}", hex::encode(sig.as_bytes()))),
            ("POLY_TIMESTAMP", timestamp),
            ("POLY_NONCE", nonce.to_string()),
        ])
    }

    /// Build the POLY_* L2 headers (HMAC over timestamp+method+path+body)
    fn l2_headers(
        creds: &ApiKeyCreds,
        address: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, ErrorInfo> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let payload = format!("{}{}{}{}", timestamp, method, path, body);

        let secret_bytes = base64::engine::general_purpose::STANDARD
            .decode(&creds.secret)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(&creds.secret))
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(&creds.secret))
            .map_err(|e| ErrorInfo::other(format!("Secret is not base64: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| ErrorInfo::other(format!("Invalid HMAC key: {}", e)))?;
        mac.update(payload.as_bytes());
        let signature =
            base64::engine::general_purpose::URL_SAFE.encode(mac.finalize().into_bytes());

        Ok(vec![
            ("POLY_ADDRESS", address.to_string()),
            ("POLY_SIGNATURE", signature),
            ("POLY_TIMESTAMP", timestamp),
            ("POLY_API_KEY", creds.key.clone()),
            ("POLY_PASSPHRASE", creds.passphrase.clone()),
        ])
    }

    async fn l1_request(
        &self,
        method: reqwest::Method,
        path: &str,
        l1: &L1AuthIdentity,
    ) -> Result<ApiKeyCreds, ErrorInfo> {
        let url = format!("{}{}", self.host, path);
        let mut req = self.http.request(method, &url);
        for (name, value) in self.l1_headers(l1).await? {
            req = req.header(name, value);
        }

        let response = req.send().await.map_err(|e| ErrorInfo::from_transport(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            return Err(ErrorInfo::from_response(status, &body));
        }

        serde_json::from_str::<ApiKeyCreds>(&body)
            .map_err(|e| ErrorInfo::other(format!("Malformed credential response: {}", e)))
    }
}

#[async_trait]
impl AuthApi for ClobClient {
    async fn derive_api_key(&self, l1: &L1AuthIdentity) -> Result<ApiKeyCreds, ErrorInfo> {
        debug!("[Clob] GET /auth/derive-api-key as {}", l1.l1_auth_address);
        self.l1_request(reqwest::Method::GET, "/auth/derive-api-key", l1)
            .await
    }

    async fn create_api_key(&self, l1: &L1AuthIdentity) -> Result<ApiKeyCreds, ErrorInfo> {
        debug!("[Clob] POST /auth/api-key as {}", l1.l1_auth_address);
        self.l1_request(reqwest::Method::POST, "/auth/api-key", l1)
            .await
    }

    async fn verify(&self, creds: &ApiKeyCreds, order: &OrderIdentity) -> Result<(), ErrorInfo> {
        let path = "/balance-allowance";
        let headers = Self::l2_headers(creds, &order.maker_address, "GET", path, "")?;

        let url = format!(
            "{}{}?asset_type=COLLATERAL&signature_type={}",
            self.host,
            path,
            order.signature_type.as_u8()
        );
        let mut req = self.http.get(&url);
        for (name, value) in headers {
            req = req.header(name, value);
        }

        let response = req.send().await.map_err(|e| ErrorInfo::from_transport(&e))?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            debug!("[Clob] Balance probe ok for {}", order.maker_address);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ErrorInfo::from_response(status, &body))
        }
    }
}

fn is_retryable_submit(err: &ErrorInfo) -> bool {
    // Transport failures and rate limiting; everything else is a real
    // rejection the strategies must handle
    err.status.is_none() || err.status == Some(429)
}

#[async_trait]
impl SessionApi for ClobClient {
    async fn submit_signed(&self, request: &OrderRequest) -> Result<OrderReceipt, ErrorInfo> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| ErrorInfo::other("No authenticated session; derive credentials first"))?;

        let path = "/order";
        let body = serde_json::json!({
            "order": {
                "tokenID": request.token_id,
                "side": match request.side {
                    OrderSide::Buy => "BUY",
                    OrderSide::Sell => "SELL",
                },
                "price": request.price.to_string(),
                "size": request.size.to_string(),
                "maker": session.order_identity.maker_address,
                "signatureType": session.order_identity.signature_type.as_u8(),
            },
            "orderType": "FOK",
        });
        let body_str = serde_json::to_string(&body)
            .map_err(|e| ErrorInfo::other(format!("Failed to encode order: {}", e)))?;

        let mut attempt = 0u32;
        loop {
            let result = self.post_order_once(&session, path, &body_str).await;
            match result {
                Ok(receipt) => {
                    info!(
                        "[Clob] Order accepted: {} {} @ {} ({})",
                        request.side,
                        request.size,
                        request.price,
                        receipt.order_id.as_deref().unwrap_or("no id")
                    );
                    return Ok(receipt);
                }
                Err(err) => {
                    attempt += 1;
                    if !is_retryable_submit(&err) || attempt > ORDER_SUBMIT_RETRIES {
                        warn!("[Clob] Order rejected: {}", err);
                        return Err(err);
                    }
                    debug!(
                        "[Clob] Order attempt {}/{} failed ({}), retrying",
                        attempt, ORDER_SUBMIT_RETRIES, err
                    );
                    tokio::time::sleep(Duration::from_millis(
                        ORDER_RETRY_DELAY_MS * u64::from(attempt),
                    ))
                    .await;
                }
            }
        }
    }

    async fn install_session(&self, creds: ApiKeyCreds, order_identity: OrderIdentity) {
        self.set_session(creds, order_identity).await;
    }
}

#[async_trait]
impl OrderGateway for ClobClient {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        self.submit_signed(request)
            .await
            .map_err(|err| anyhow::anyhow!("Order submission failed: {}", err))
    }
}

impl ClobClient {
    async fn post_order_once(
        &self,
        session: &Session,
        path: &str,
        body: &str,
    ) -> Result<OrderReceipt, ErrorInfo> {
        let headers = Self::l2_headers(
            &session.creds,
            &session.order_identity.maker_address,
            "POST",
            path,
            body,
        )?;

        let url = format!("{}{}", self.host, path);
        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        for (name, value) in headers {
            req = req.header(name, value);
        }

        let response = req.send().await.map_err(|e| ErrorInfo::from_transport(&e))?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            return Err(ErrorInfo::from_response(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ErrorInfo::other(format!("Malformed order response: {}", e)))
    }
}
