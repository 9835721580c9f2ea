//! On-chain redemption via the gasless relay
//!
//! Redeeming resolved positions is a CTF contract call. Rather than pay
//! gas, the calldata is ABI-encoded here, signed with the wallet key,
//! and submitted through the Polymarket relay with builder HMAC headers.
//! NegRisk positions must target the NegRisk adapter instead of the CTF
//! contract directly.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::signers::{local::PrivateKeySigner, Signer};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::str::FromStr;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

const RELAY_URL: &str = "https://relayer-v2.polymarket.com";
/// CTF contract on Polygon
const CTF_ADDRESS: &str = "0x4d97dcd97ec945f40cf65f87097ace5ea0476045";
/// USDC on Polygon (6 decimals)
const USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";
/// NegRisk adapter for NegRisk market positions
const NEG_RISK_ADAPTER: &str = "0xd91E80cF2E7be2e162c6513ceD06f1dD0dA35296";
const USDC_DECIMALS: u32 = 6;

sol! {
    function redeemPositions(
        address collateralToken,
        bytes32 parentCollectionId,
        bytes32 conditionId,
        uint256[] indexSets
    );
}

mod neg_risk_abi {
    alloy::sol! {
        function redeemPositions(bytes32 conditionId, uint256[] amounts);
    }
}

/// Builder credentials for the relay
#[derive(Debug, Clone)]
pub struct BuilderCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// A single redemption to perform
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub condition_id: String,
    pub neg_risk: bool,
    /// Shares held, used for the NegRisk amounts vector
    pub size: Decimal,
    pub side_index: u8,
}

/// On-chain redemption seam; mocked in strategy tests
#[async_trait]
pub trait Redeemer: Send + Sync {
    /// Redeem a resolved position, returning the relay transaction id
    async fn redeem(&self, request: &RedeemRequest) -> Result<String>;
}

/// Relay-backed redeemer
pub struct RelayRedeemer {
    http: reqwest::Client,
    relay_url: String,
    signer: PrivateKeySigner,
    funder_address: String,
    creds: BuilderCredentials,
}

impl RelayRedeemer {
    pub fn new(
        signer: PrivateKeySigner,
        funder_address: &str,
        creds: BuilderCredentials,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            relay_url: RELAY_URL.to_string(),
            signer,
            funder_address: funder_address.to_string(),
            creds,
        }
    }

    fn hmac_headers(&self, method: &str, path: &str, body: &str) -> Result<(String, String)> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let payload = format!("{}{}{}{}", timestamp, method, path, body);

        let secret_bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.creds.secret)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(&self.creds.secret))
            .or_else(|_| {
                base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(&self.creds.secret)
            })?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)?;
        mac.update(payload.as_bytes());
        let signature =
            base64::engine::general_purpose::URL_SAFE.encode(mac.finalize().into_bytes());
        Ok((timestamp, signature))
    }
}

/// Build the redemption calldata for a request
fn build_redeem_calldata(request: &RedeemRequest) -> Result<(Address, Vec<u8>)> {
    let condition_id = B256::from_str(&request.condition_id)
        .with_context(|| format!("Invalid condition id {}", request.condition_id))?;

    if request.neg_risk {
        let adapter: Address = NEG_RISK_ADAPTER.parse()?;
        // amounts indexed by outcome: the held side gets the share count
        let raw = (request.size * Decimal::from(10u64.pow(USDC_DECIMALS)))
            .floor()
            .to_u128()
            .context("Position size out of range")?;
        let mut amounts = vec![U256::ZERO, U256::ZERO];
        amounts[usize::from(request.side_index.min(1))] = U256::from(raw);

        let call = neg_risk_abi::redeemPositionsCall {
            conditionId: condition_id,
            amounts,
        };
        Ok((adapter, call.abi_encode()))
    } else {
        let ctf: Address = CTF_ADDRESS.parse()?;
        let usdc: Address = USDC_ADDRESS.parse()?;
        let call = redeemPositionsCall {
            collateralToken: usdc,
            parentCollectionId: B256::ZERO,
            conditionId: condition_id,
            indexSets: vec![U256::from(1), U256::from(2)],
        };
        Ok((ctf, call.abi_encode()))
    }
}

#[async_trait]
impl Redeemer for RelayRedeemer {
    async fn redeem(&self, request: &RedeemRequest) -> Result<String> {
        let (target, calldata) = build_redeem_calldata(request)?;
        let data_hex = format!("0x{}", hex::encode(&calldata));

        // Attestation signature over the calldata hash
        let digest = keccak256(&calldata);
        let sig = self.signer.sign_hash(&digest).await?;

        let body = serde_json::json!({
            "from": format!("{:?}", self.signer.address()),
            "to": format!("{:?}", target),
            "proxyWallet": self.funder_address,
            "data": data_hex,
            "signature": format!("0x{}", hex::encode(sig.as_bytes())),
            "type": "SAFE",
        });
        let body_str = serde_json::to_string(&body)?;
        let (timestamp, signature) = self.hmac_headers("POST", "/submit", &body_str)?;

        debug!(
            "[Redeem] Submitting redemption for {} via {}",
            request.condition_id,
            if request.neg_risk { "NegRisk adapter" } else { "CTF" }
        );

        let response = self
            .http
            .post(format!("{}/submit", self.relay_url))
            .header("POLY_BUILDER_TIMESTAMP", &timestamp)
            .header("POLY_BUILDER_SIGNATURE", &signature)
            .header("POLY_BUILDER_API_KEY", &self.creds.api_key)
            .header("POLY_BUILDER_PASSPHRASE", &self.creds.passphrase)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Relay error ({}): {}", status, text);
        }

        let json: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        let tx_id = json
            .get("transactionID")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        info!(
            "[Redeem] Redemption submitted for {}: tx_id={}",
            request.condition_id, tx_id
        );
        Ok(tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(neg_risk: bool) -> RedeemRequest {
        RedeemRequest {
            condition_id: "0x1234567890123456789012345678901234567890123456789012345678901234"
                .to_string(),
            neg_risk,
            size: dec!(12.5),
            side_index: 0,
        }
    }

    #[test]
    fn ctf_calldata_targets_ctf_contract() {
        let (target, calldata) = build_redeem_calldata(&request(false)).unwrap();
        assert_eq!(format!("{:?}", target).to_lowercase(), CTF_ADDRESS);
        // 4-byte selector + 4 static words + dynamic array (offset/len/2 items)
        assert_eq!(&calldata[..4], &redeemPositionsCall::SELECTOR);
    }

    #[test]
    fn neg_risk_calldata_targets_adapter() {
        let (target, calldata) = build_redeem_calldata(&request(true)).unwrap();
        assert_eq!(
            format!("{:?}", target).to_lowercase(),
            NEG_RISK_ADAPTER.to_lowercase()
        );
        assert_eq!(&calldata[..4], &neg_risk_abi::redeemPositionsCall::SELECTOR);
    }

    #[test]
    fn invalid_condition_id_is_rejected() {
        let mut req = request(false);
        req.condition_id = "not-a-hash".to_string();
        assert!(build_redeem_calldata(&req).is_err());
    }
}
