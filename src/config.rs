//! Configuration management for the Polymarket bot

use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::fmt;
use std::str::FromStr;

/// Wallet mode selecting how orders are signed and funded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletMode {
    /// Private key directly controls the funds (signature type 0)
    Eoa,
    /// Polymarket proxy wallet holds the funds (signature type 1)
    Proxy,
    /// Gnosis Safe holds the funds (signature type 2)
    Safe,
}

impl WalletMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletMode::Eoa => "eoa",
            WalletMode::Proxy => "proxy",
            WalletMode::Safe => "safe",
        }
    }
}

impl FromStr for WalletMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "eoa" => Ok(WalletMode::Eoa),
            "proxy" => Ok(WalletMode::Proxy),
            "safe" | "gnosis" | "gnosis-safe" => Ok(WalletMode::Safe),
            other => anyhow::bail!("Unknown wallet mode: {}", other),
        }
    }
}

impl fmt::Display for WalletMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Private key for signing (required for live trading and auth checks)
    pub private_key: Option<String>,

    /// Explicit wallet mode override; auto-detected when absent
    pub wallet_mode: Option<WalletMode>,

    /// Explicit signature type override (0=EOA, 1=Proxy, 2=Safe)
    pub signature_type: Option<u8>,

    /// Funder address for Safe/Proxy modes
    pub funder_address: Option<String>,

    /// Force the L1 auth address choice ("signer" or "effective")
    pub force_l1_auth: Option<String>,

    /// Path to the credential cache file
    pub cred_cache_path: String,

    /// CLOB API host
    pub clob_host: String,

    /// Data API host (position snapshots)
    pub data_api_host: String,

    /// Polygon chain id used in EIP-712 domains
    pub chain_id: u64,

    /// Orchestrator tick interval in seconds
    pub cycle_interval_seconds: u64,

    pub auto_redeem: AutoRedeemConfig,
    pub hedging: HedgingConfig,
    pub stop_loss: StopLossConfig,
    pub profit_taking: ProfitTakingConfig,
    pub endgame_sweep: EndgameSweepConfig,

    /// Builder credentials for the gasless relay (on-chain redemption)
    pub builder_api_key: Option<String>,
    pub builder_secret: Option<String>,
    pub builder_passphrase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AutoRedeemConfig {
    /// Seconds to wait after a failed redemption before retrying
    pub retry_cooldown_seconds: u64,
    /// Consecutive failures before entering the max-failures hold
    pub max_failures: u32,
    /// Seconds of inactivity after which failure state resets to eligible
    pub reset_after_seconds: u64,
    /// Minimum price for the fallback sell to be considered sellable
    pub fallback_sell_min_price: Decimal,
}

impl Default for AutoRedeemConfig {
    fn default() -> Self {
        Self {
            retry_cooldown_seconds: 120,
            max_failures: 5,
            reset_after_seconds: 3600,
            fallback_sell_min_price: Decimal::new(2, 2), // 0.02
        }
    }
}

#[derive(Debug, Clone)]
pub struct HedgingConfig {
    /// Drawdown fraction that triggers an opposite-side hedge (0.15 = -15%)
    pub trigger_drawdown: Decimal,
    /// Fraction of the position size to hedge
    pub hedge_ratio: Decimal,
    /// Seconds between hedge attempts per market
    pub cooldown_seconds: u64,
}

impl Default for HedgingConfig {
    fn default() -> Self {
        Self {
            trigger_drawdown: Decimal::new(15, 2), // 0.15
            hedge_ratio: Decimal::new(50, 2),      // 0.50
            cooldown_seconds: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopLossConfig {
    /// Loss fraction that triggers a full exit (0.30 = -30%)
    pub trigger_loss: Decimal,
    /// Seconds before a pending sell is considered stale and retried
    pub pending_sell_timeout_seconds: u64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            trigger_loss: Decimal::new(30, 2), // 0.30
            pending_sell_timeout_seconds: 180,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfitTakingConfig {
    /// Gain fraction that triggers a take-profit sell (0.20 = +20%)
    pub trigger_gain: Decimal,
    /// Seconds between take-profit attempts per position
    pub cooldown_seconds: u64,
}

impl Default for ProfitTakingConfig {
    fn default() -> Self {
        Self {
            trigger_gain: Decimal::new(20, 2), // 0.20
            cooldown_seconds: 240,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndgameSweepConfig {
    /// Minimum price of the favorite to sweep-buy (0.97)
    pub min_price: Decimal,
    /// Maximum price to still leave room for profit (0.995)
    pub max_price: Decimal,
    /// Maximum USDC exposure per swept market
    pub max_exposure_per_market: Decimal,
    /// Seconds between sweep attempts per market
    pub cooldown_seconds: u64,
}

impl Default for EndgameSweepConfig {
    fn default() -> Self {
        Self {
            min_price: Decimal::new(97, 2),
            max_price: Decimal::new(995, 3),
            max_exposure_per_market: Decimal::from(100),
            cooldown_seconds: 600,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let private_key = env::var("POLYMARKET_PRIVATE_KEY")
            .or_else(|_| env::var("PRIVATE_KEY"))
            .ok()
            .filter(|s| !s.is_empty());

        let wallet_mode = env::var("WALLET_MODE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse())
            .transpose()?;

        let signature_type = env::var("POLYMARKET_SIGNATURE_TYPE")
            .ok()
            .and_then(|v| v.parse().ok());

        let funder_address = env::var("POLYMARKET_PROXY_ADDRESS")
            .or_else(|_| env::var("CLOB_FUNDER_ADDRESS"))
            .ok()
            .filter(|s| !s.is_empty());

        let force_l1_auth = env::var("FORCE_L1_AUTH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase());

        let cred_cache_path = env::var("CRED_CACHE_PATH")
            .unwrap_or_else(|_| ".clob-creds.json".to_string());

        let clob_host = env::var("CLOB_HOST")
            .unwrap_or_else(|_| "https://clob.polymarket.com".to_string());

        let data_api_host = env::var("DATA_API_HOST")
            .unwrap_or_else(|_| "https://data-api.polymarket.com".to_string());

        let chain_id = env::var("CHAIN_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(137);

        let cycle_interval_seconds = env::var("CYCLE_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let builder_api_key = env::var("POLY_BUILDER_API_KEY").ok().filter(|s| !s.is_empty());
        let builder_secret = env::var("POLY_BUILDER_SECRET").ok().filter(|s| !s.is_empty());
        let builder_passphrase = env::var("POLY_BUILDER_PASSPHRASE").ok().filter(|s| !s.is_empty());

        Ok(Self {
            private_key,
            wallet_mode,
            signature_type,
            funder_address,
            force_l1_auth,
            cred_cache_path,
            clob_host,
            data_api_host,
            chain_id,
            cycle_interval_seconds,
            auto_redeem: AutoRedeemConfig::default(),
            hedging: HedgingConfig::default(),
            stop_loss: StopLossConfig::default(),
            profit_taking: ProfitTakingConfig::default(),
            endgame_sweep: EndgameSweepConfig::default(),
            builder_api_key,
            builder_secret,
            builder_passphrase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_mode_parses_aliases() {
        assert_eq!("EOA".parse::<WalletMode>().unwrap(), WalletMode::Eoa);
        assert_eq!("gnosis-safe".parse::<WalletMode>().unwrap(), WalletMode::Safe);
        assert_eq!("Proxy".parse::<WalletMode>().unwrap(), WalletMode::Proxy);
        assert!("multisig".parse::<WalletMode>().is_err());
    }

    #[test]
    fn strategy_defaults_are_sane() {
        let cfg = AutoRedeemConfig::default();
        assert!(cfg.max_failures > 0);
        assert!(cfg.reset_after_seconds > cfg.retry_cooldown_seconds);

        let sweep = EndgameSweepConfig::default();
        assert!(sweep.min_price < sweep.max_price);
    }
}
