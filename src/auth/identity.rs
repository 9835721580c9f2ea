//! Order and L1-auth identity resolution
//!
//! Polymarket signs orders as one identity (maker/funder) and derives API
//! credentials as another (the L1 auth address). The two are resolved
//! independently on purpose: the fallback ladder probes (signature type,
//! L1 address) combinations that order-identity resolution alone would
//! never produce.

use crate::config::WalletMode;
use std::fmt;
use tracing::{debug, warn};

/// CLOB signature type, wire values 0/1/2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignatureType {
    Eoa = 0,
    Proxy = 1,
    Safe = 2,
}

impl SignatureType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SignatureType::Eoa),
            1 => Some(SignatureType::Proxy),
            2 => Some(SignatureType::Safe),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SignatureType::Eoa => "EOA",
            SignatureType::Proxy => "Proxy",
            SignatureType::Safe => "Safe",
        }
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Inputs to identity resolution, fixed for the lifetime of a run
#[derive(Debug, Clone)]
pub struct IdentityParams {
    /// Address derived from the signing private key
    pub signer_address: String,
    /// Funds-holding address for Safe/Proxy modes
    pub funder_address: Option<String>,
    /// Explicit wallet-mode override from config
    pub wallet_mode: Option<WalletMode>,
    /// Configured signature-type hint used for auto-detection
    pub signature_type: Option<u8>,
    /// Force the L1 auth address choice regardless of ladder preference
    pub force_l1_auth: Option<L1AuthChoice>,
}

/// Which address authenticates against the L1 endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1AuthChoice {
    Signer,
    Effective,
}

/// Identity used for order signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIdentity {
    pub signature_type: SignatureType,
    pub maker_address: String,
    pub funder_address: String,
    pub effective_address: String,
}

/// Identity used for L1 credential derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1AuthIdentity {
    pub signature_type: SignatureType,
    pub l1_auth_address: String,
    pub signing_address: String,
}

/// Auto-detect the wallet mode from config hints.
///
/// An explicit override wins. Safe/Proxy without a funder address is a
/// misconfiguration recovered by downgrading to EOA with a warning.
pub fn detect_wallet_mode(params: &IdentityParams) -> WalletMode {
    let detected = match params.wallet_mode {
        Some(mode) => mode,
        None => match params.signature_type.and_then(SignatureType::from_u8) {
            Some(SignatureType::Safe) => WalletMode::Safe,
            Some(SignatureType::Proxy) => WalletMode::Proxy,
            _ => WalletMode::Eoa,
        },
    };

    if detected != WalletMode::Eoa && params.funder_address.is_none() {
        warn!(
            "[Identity] Wallet mode '{}' requested without a funder address, falling back to EOA",
            detected
        );
        return WalletMode::Eoa;
    }

    detected
}

/// Resolve the order-signing identity for one ladder attempt.
///
/// Invariant: EOA mode makes all three addresses the signer; Safe/Proxy
/// make all three the configured funder.
pub fn resolve_order_identity(
    params: &IdentityParams,
    signature_type: SignatureType,
) -> OrderIdentity {
    let effective = match signature_type {
        SignatureType::Eoa => params.signer_address.clone(),
        SignatureType::Proxy | SignatureType::Safe => match &params.funder_address {
            Some(funder) => funder.clone(),
            None => {
                warn!(
                    "[Identity] {} signing without funder address, using signer address",
                    signature_type
                );
                params.signer_address.clone()
            }
        },
    };

    let identity = OrderIdentity {
        signature_type,
        maker_address: effective.clone(),
        funder_address: effective.clone(),
        effective_address: effective,
    };

    debug!(
        "[Identity] Order identity: type={} maker={} funder={}",
        identity.signature_type, identity.maker_address, identity.funder_address
    );

    identity
}

/// Resolve the L1 auth identity for one ladder attempt.
///
/// `prefer_effective` selects the effective (funds-holding) address; a
/// `force_l1_auth` override from config takes precedence.
pub fn resolve_l1_identity(
    params: &IdentityParams,
    signature_type: SignatureType,
    prefer_effective: bool,
) -> L1AuthIdentity {
    let choice = match params.force_l1_auth {
        Some(forced) => forced,
        None if prefer_effective => L1AuthChoice::Effective,
        None => L1AuthChoice::Signer,
    };

    // The effective choice comes straight from the configured funder, not
    // from the attempt's order identity. EOA order identity collapses the
    // effective address to the signer, which would make a swapped-address
    // retry resend the same address.
    let l1_auth_address = match choice {
        L1AuthChoice::Signer => params.signer_address.clone(),
        L1AuthChoice::Effective => params
            .funder_address
            .clone()
            .unwrap_or_else(|| params.signer_address.clone()),
    };

    debug!(
        "[Identity] L1 auth identity: type={} l1_address={} (choice={:?})",
        signature_type, l1_auth_address, choice
    );

    L1AuthIdentity {
        signature_type,
        l1_auth_address,
        signing_address: params.signer_address.clone(),
    }
}
