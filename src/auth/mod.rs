//! Authentication subsystem: identity resolution, the credential
//! fallback ladder, the derivation engine and its diagnostics.

pub mod cred_cache;
pub mod derive;
pub mod errors;
pub mod fingerprint;
pub mod identity;
pub mod ladder;
pub mod story;

pub use cred_cache::CredCache;
pub use derive::{derive_credentials_with_fallback, AuthApi, DerivationResult};
pub use errors::{is_could_not_create_key, is_invalid_l1_headers, ErrorInfo};
pub use fingerprint::CredentialFingerprint;
pub use identity::{
    detect_wallet_mode, resolve_l1_identity, resolve_order_identity, IdentityParams, L1AuthChoice,
    L1AuthIdentity, OrderIdentity, SignatureType,
};
pub use ladder::{FallbackAttempt, FALLBACK_LADDER};
pub use story::{AuthStory, AuthStoryBuilder, FinalResult, SummaryGate};

use serde::{Deserialize, Serialize};

/// API credential triple returned by the CLOB's derive/create endpoints.
/// Never logged directly; diagnostics go through [`CredentialFingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyCreds {
    #[serde(alias = "apiKey")]
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

impl ApiKeyCreds {
    /// All three fields present and non-empty
    pub fn is_complete(&self) -> bool {
        !self.key.is_empty() && !self.secret.is_empty() && !self.passphrase.is_empty()
    }
}
