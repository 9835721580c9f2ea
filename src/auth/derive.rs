//! Credential derivation engine
//!
//! Drives the fallback ladder against the CLOB auth endpoints: check the
//! local cache first, then walk the 5-entry ladder in order, deriving
//! (or creating) an API key per entry and verifying it against a live
//! balance probe before trusting it. First verified success wins. A 401
//! "Invalid L1 Request headers" failure earns exactly one extra attempt
//! with the L1 address choice inverted before the ladder advances; the
//! swapped attempt is never itself re-swapped, so each entry is bounded
//! at two attempts.

use super::cred_cache::{CacheKey, CredCache};
use super::errors::{is_could_not_create_key, is_invalid_l1_headers, ErrorInfo};
use super::fingerprint::CredentialFingerprint;
use super::identity::{
    detect_wallet_mode, resolve_l1_identity, resolve_order_identity, IdentityParams,
    L1AuthIdentity, OrderIdentity, SignatureType,
};
use super::ladder::FALLBACK_LADDER;
use super::story::{AuthAttempt, AuthStoryBuilder, FinalResult};
use super::ApiKeyCreds;
use crate::config::WalletMode;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Reachable auth operations on the exchange, kept behind a trait so the
/// engine can be exercised against scripted collaborators in tests.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// GET /auth/derive-api-key with L1 headers: returns the existing key
    async fn derive_api_key(&self, l1: &L1AuthIdentity) -> Result<ApiKeyCreds, ErrorInfo>;

    /// POST /auth/api-key with L1 headers: mints a new key
    async fn create_api_key(&self, l1: &L1AuthIdentity) -> Result<ApiKeyCreds, ErrorInfo>;

    /// Live balance/allowance probe with L2 headers; the only way a
    /// credential set earns trust
    async fn verify(&self, creds: &ApiKeyCreds, order: &OrderIdentity) -> Result<(), ErrorInfo>;
}

/// Final outcome of one `derive_credentials_with_fallback` call
#[derive(Debug, Clone)]
pub struct DerivationResult {
    pub success: bool,
    pub creds: Option<ApiKeyCreds>,
    pub signature_type: Option<SignatureType>,
    pub used_effective_for_l1: Option<bool>,
    pub error: Option<String>,
    pub from_cache: bool,
}

impl DerivationResult {
    fn success(
        creds: ApiKeyCreds,
        signature_type: SignatureType,
        used_effective_for_l1: bool,
        from_cache: bool,
    ) -> Self {
        Self {
            success: true,
            creds: Some(creds),
            signature_type: Some(signature_type),
            used_effective_for_l1: Some(used_effective_for_l1),
            error: None,
            from_cache,
        }
    }

    fn failure(error: String) -> Self {
        Self {
            success: false,
            creds: None,
            signature_type: None,
            used_effective_for_l1: None,
            error: Some(error),
            from_cache: false,
        }
    }
}

fn mode_signature_type(mode: WalletMode) -> SignatureType {
    match mode {
        WalletMode::Eoa => SignatureType::Eoa,
        WalletMode::Proxy => SignatureType::Proxy,
        WalletMode::Safe => SignatureType::Safe,
    }
}

fn cache_key(params: &IdentityParams, sig_type: SignatureType, use_effective: bool) -> CacheKey {
    CacheKey {
        signer_address: params.signer_address.clone(),
        signature_type: sig_type,
        funder_address: params.funder_address.clone(),
        use_effective_for_l1: use_effective,
    }
}

/// Derive working credentials, preferring the cache and falling back to
/// the ladder. Records every attempt in the story builder and sets the
/// story's final result.
pub async fn derive_credentials_with_fallback(
    api: &dyn AuthApi,
    params: &IdentityParams,
    cache: &CredCache,
    story: &mut AuthStoryBuilder,
) -> DerivationResult {
    let mode = detect_wallet_mode(params);
    let baseline = resolve_order_identity(params, mode_signature_type(mode));
    story.set_identity(
        mode.as_str(),
        &params.signer_address,
        &baseline.maker_address,
        params.funder_address.as_deref(),
        &baseline.effective_address,
    );

    info!(
        "[Auth] Deriving credentials for {} (mode {})",
        params.signer_address, mode
    );

    // Cache fast path: a previously verified set for any ladder combination
    // skips the ladder entirely when it still verifies.
    for entry in FALLBACK_LADDER.iter() {
        let key = cache_key(params, entry.signature_type, entry.use_effective_for_l1);
        let Some(cached) = cache.load(&key) else {
            continue;
        };

        let order = resolve_order_identity(params, entry.signature_type);
        match api.verify(&cached, &order).await {
            Ok(()) => {
                info!("[Auth] Cached credentials verified ({})", entry.label);
                story.set_credential_fingerprint(CredentialFingerprint::of(&cached));
                story.set_final_result(FinalResult::Success {
                    signature_type: entry.signature_type.as_u8(),
                    use_effective_for_l1: entry.use_effective_for_l1,
                });
                return DerivationResult::success(
                    cached,
                    entry.signature_type,
                    entry.use_effective_for_l1,
                    true,
                );
            }
            Err(e) => {
                warn!(
                    "[Auth] Cached credentials failed verification ({}), clearing entry",
                    e
                );
                if let Err(clear_err) = cache.clear_entry(&key) {
                    warn!("[Auth] Failed to clear stale cache entry: {}", clear_err);
                }
                break; // stale cache, walk the ladder
            }
        }
    }

    let mut never_traded = false;
    let mut last_error: Option<ErrorInfo> = None;

    for entry in FALLBACK_LADDER.iter() {
        debug!("[Auth] Ladder attempt {}", entry.label);
        let outcome = attempt_entry(
            api,
            params,
            story,
            entry.signature_type,
            entry.use_effective_for_l1,
            entry.label,
            false,
        )
        .await;

        let err = match outcome {
            Ok(creds) => {
                return finish_success(
                    cache,
                    story,
                    params,
                    creds,
                    entry.signature_type,
                    entry.use_effective_for_l1,
                );
            }
            Err(e) => e,
        };

        if is_could_not_create_key(&err) {
            never_traded = true;
        }

        // One bounded swap of the L1 address choice on the exact 401
        // signature; the swapped attempt is never re-swapped.
        if is_invalid_l1_headers(&err) {
            let swapped_effective = !entry.use_effective_for_l1;
            info!(
                "[Auth] {} hit invalid L1 headers, retrying with {} auth address",
                entry.label,
                if swapped_effective { "effective" } else { "signer" }
            );
            match attempt_entry(
                api,
                params,
                story,
                entry.signature_type,
                swapped_effective,
                entry.label,
                true,
            )
            .await
            {
                Ok(creds) => {
                    return finish_success(
                        cache,
                        story,
                        params,
                        creds,
                        entry.signature_type,
                        swapped_effective,
                    );
                }
                Err(swap_err) => {
                    if is_could_not_create_key(&swap_err) {
                        never_traded = true;
                    }
                    last_error = Some(swap_err);
                }
            }
        } else {
            last_error = Some(err);
        }
    }

    let mut reason = format!(
        "All {} fallback combinations failed (last error: {})",
        FALLBACK_LADDER.len(),
        last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
    );
    if never_traded {
        reason.push_str(
            "; the wallet appears to have never traded. Trade once on polymarket.com, then retry",
        );
    }

    warn!("[Auth] {}", reason);
    story.set_final_result(FinalResult::Failure {
        reason: reason.clone(),
    });
    DerivationResult::failure(reason)
}

/// One derive-then-create attempt for a (signature type, L1 choice) pair,
/// verified before being returned. Records itself in the story.
async fn attempt_entry(
    api: &dyn AuthApi,
    params: &IdentityParams,
    story: &mut AuthStoryBuilder,
    sig_type: SignatureType,
    use_effective: bool,
    label: &str,
    swapped: bool,
) -> Result<ApiKeyCreds, ErrorInfo> {
    let l1 = resolve_l1_identity(params, sig_type, use_effective);
    let order = resolve_order_identity(params, sig_type);

    let result = attempt_credentials(api, &l1, &order).await;

    story.add_attempt(AuthAttempt {
        label: label.to_string(),
        signature_type: sig_type.as_u8(),
        use_effective_for_l1: use_effective,
        l1_auth_address: l1.l1_auth_address.clone(),
        success: result.is_ok(),
        status_code: result.as_ref().err().and_then(|e| e.status),
        error: result.as_ref().err().map(|e| e.message_or_unknown().to_string()),
        swapped,
    });

    result
}

async fn attempt_credentials(
    api: &dyn AuthApi,
    l1: &L1AuthIdentity,
    order: &OrderIdentity,
) -> Result<ApiKeyCreds, ErrorInfo> {
    // Derive first; create only when derive failed for a reason other
    // than invalid L1 headers (which would fail the create identically
    // and must instead trigger the swap path upstream).
    let creds = match api.derive_api_key(l1).await {
        Ok(creds) => creds,
        Err(derive_err) => {
            if is_invalid_l1_headers(&derive_err) {
                return Err(derive_err);
            }
            debug!("[Auth] Derive failed ({}), trying create", derive_err);
            api.create_api_key(l1).await?
        }
    };

    if !creds.is_complete() {
        return Err(ErrorInfo::other("Incomplete credential triple returned"));
    }

    // Transport failures here count as a failed attempt, not a retry;
    // the ladder's breadth is the retry mechanism.
    api.verify(&creds, order).await?;
    Ok(creds)
}

fn finish_success(
    cache: &CredCache,
    story: &mut AuthStoryBuilder,
    params: &IdentityParams,
    creds: ApiKeyCreds,
    sig_type: SignatureType,
    use_effective: bool,
) -> DerivationResult {
    info!(
        "[Auth] Verified credentials with signature type {} ({} L1 auth)",
        sig_type,
        if use_effective { "effective" } else { "signer" }
    );

    let key = cache_key(params, sig_type, use_effective);
    if let Err(e) = cache.save(&key, &creds) {
        warn!("[Auth] Failed to persist credentials: {}", e);
    }

    story.set_credential_fingerprint(CredentialFingerprint::of(&creds));
    story.set_final_result(FinalResult::Success {
        signature_type: sig_type.as_u8(),
        use_effective_for_l1: use_effective,
    });

    DerivationResult::success(creds, sig_type, use_effective, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const SIGNER: &str = "0x1111111111111111111111111111111111111111";
    const FUNDER: &str = "0x2222222222222222222222222222222222222222";

    fn params() -> IdentityParams {
        IdentityParams {
            signer_address: SIGNER.to_string(),
            funder_address: Some(FUNDER.to_string()),
            wallet_mode: None,
            signature_type: None,
            force_l1_auth: None,
        }
    }

    fn creds(key: &str) -> ApiKeyCreds {
        ApiKeyCreds {
            key: key.to_string(),
            secret: "c2VjcmV0LXZhbHVl".to_string(),
            passphrase: "phrase".to_string(),
        }
    }

    fn invalid_l1() -> ErrorInfo {
        ErrorInfo::from_response(401, r#"{"error":"Invalid L1 Request headers"}"#)
    }

    fn could_not_create() -> ErrorInfo {
        ErrorInfo::from_response(400, r#"{"error":"could not create api key"}"#)
    }

    fn server_error() -> ErrorInfo {
        ErrorInfo::from_response(500, "internal")
    }

    /// Mock keyed by (signature type, l1 address is the effective one)
    #[derive(Default)]
    struct MockAuthApi {
        derive: HashMap<(u8, bool), Result<ApiKeyCreds, ErrorInfo>>,
        create: HashMap<(u8, bool), Result<ApiKeyCreds, ErrorInfo>>,
        verify_reject: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockAuthApi {
        fn mock_key(l1: &L1AuthIdentity) -> (u8, bool) {
            (l1.signature_type.as_u8(), l1.l1_auth_address == FUNDER)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn ladder_call_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with("derive") || c.starts_with("create"))
                .count()
        }
    }

    #[async_trait]
    impl AuthApi for MockAuthApi {
        async fn derive_api_key(&self, l1: &L1AuthIdentity) -> Result<ApiKeyCreds, ErrorInfo> {
            let key = Self::mock_key(l1);
            self.calls
                .lock()
                .unwrap()
                .push(format!("derive:{}:{}", key.0, key.1));
            self.derive
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(server_error()))
        }

        async fn create_api_key(&self, l1: &L1AuthIdentity) -> Result<ApiKeyCreds, ErrorInfo> {
            let key = Self::mock_key(l1);
            self.calls
                .lock()
                .unwrap()
                .push(format!("create:{}:{}", key.0, key.1));
            self.create
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(server_error()))
        }

        async fn verify(&self, creds: &ApiKeyCreds, _order: &OrderIdentity) -> Result<(), ErrorInfo> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("verify:{}", creds.key));
            if self.verify_reject.contains(&creds.key) {
                Err(ErrorInfo::from_response(401, "Unauthorized"))
            } else {
                Ok(())
            }
        }
    }

    fn test_fixtures() -> (TempDir, CredCache, AuthStoryBuilder) {
        let dir = TempDir::new().unwrap();
        let cache = CredCache::new(dir.path().join("creds.json"));
        let story = AuthStoryBuilder::new("https://clob.example.com", 137);
        (dir, cache, story)
    }

    #[tokio::test]
    async fn cache_hit_skips_the_ladder() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        cache
            .save(&cache_key(&p, SignatureType::Eoa, false), &creds("cached"))
            .unwrap();

        let api = MockAuthApi::default();
        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(result.success);
        assert!(result.from_cache);
        assert_eq!(result.signature_type, Some(SignatureType::Eoa));
        assert_eq!(api.ladder_call_count(), 0);
        assert_eq!(api.calls(), vec!["verify:cached"]);
    }

    #[tokio::test]
    async fn stale_cache_is_cleared_and_ladder_runs() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let key = cache_key(&p, SignatureType::Eoa, false);
        cache.save(&key, &creds("stale")).unwrap();

        let mut api = MockAuthApi::default();
        api.verify_reject = vec!["stale".to_string()];
        api.derive.insert((0, false), Ok(creds("fresh")));

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(result.success);
        assert!(!result.from_cache);
        assert_eq!(result.creds.unwrap().key, "fresh");
        // The stale entry is gone; the fresh one was saved in its place
        assert_eq!(cache.load(&key), Some(creds("fresh")));
        assert!(api.ladder_call_count() > 0);
    }

    #[tokio::test]
    async fn first_success_wins_and_populates_cache() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        api.derive.insert((0, false), Ok(creds("eoa-key")));

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(result.success);
        assert_eq!(result.signature_type, Some(SignatureType::Eoa));
        assert_eq!(result.used_effective_for_l1, Some(false));
        assert_eq!(api.calls(), vec!["derive:0:false", "verify:eoa-key"]);
        assert_eq!(
            cache.load(&cache_key(&p, SignatureType::Eoa, false)),
            Some(creds("eoa-key"))
        );
        assert!(matches!(
            story.story().final_result,
            FinalResult::Success {
                signature_type: 0,
                use_effective_for_l1: false
            }
        ));
    }

    #[tokio::test]
    async fn invalid_l1_triggers_exactly_one_swap_before_advancing() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        // Entry A (EOA/signer) and its swap (EOA/effective) both fail with
        // invalid L1 headers; entry B (Safe/signer) succeeds.
        api.derive.insert((0, false), Err(invalid_l1()));
        api.derive.insert((0, true), Err(invalid_l1()));
        api.derive.insert((2, false), Ok(creds("safe-key")));

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(result.success);
        assert_eq!(result.signature_type, Some(SignatureType::Safe));

        // Exactly one swapped attempt for entry A: derive(0,false),
        // derive(0,true), then entry B. No second swap.
        let derives: Vec<String> = api
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("derive"))
            .collect();
        assert_eq!(
            derives,
            vec!["derive:0:false", "derive:0:true", "derive:2:false"]
        );

        let swapped: Vec<bool> = story.story().attempts.iter().map(|a| a.swapped).collect();
        assert_eq!(swapped, vec![false, true, false]);
    }

    #[tokio::test]
    async fn swap_success_is_cached_under_the_inverted_choice() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        api.derive.insert((0, false), Err(invalid_l1()));
        api.derive.insert((0, true), Ok(creds("swapped-key")));

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(result.success);
        assert_eq!(result.used_effective_for_l1, Some(true));
        assert_eq!(
            cache.load(&cache_key(&p, SignatureType::Eoa, true)),
            Some(creds("swapped-key"))
        );
    }

    #[tokio::test]
    async fn all_entries_invalid_l1_yields_ten_attempts_and_failure() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        for sig in [0u8, 1, 2] {
            for eff in [false, true] {
                api.derive.insert((sig, eff), Err(invalid_l1()));
            }
        }

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(!result.success);
        assert!(result.error.is_some());
        // 5 ladder entries, each with one swapped retry
        assert_eq!(story.attempt_count(), 10);
        assert_eq!(
            story.story().attempts.iter().filter(|a| a.swapped).count(),
            5
        );
        assert!(matches!(
            story.story().final_result,
            FinalResult::Failure { .. }
        ));
    }

    #[tokio::test]
    async fn derive_failure_falls_back_to_create() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        api.derive.insert((0, false), Err(server_error()));
        api.create.insert((0, false), Ok(creds("minted")));

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(result.success);
        assert_eq!(result.creds.unwrap().key, "minted");
        assert_eq!(
            api.calls(),
            vec!["derive:0:false", "create:0:false", "verify:minted"]
        );
    }

    #[tokio::test]
    async fn invalid_l1_on_derive_skips_create() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        api.derive.insert((0, false), Err(invalid_l1()));
        // Swap and every later entry fail plainly so the run ends
        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;
        assert!(!result.success);

        // create was attempted for plain failures, but never for the
        // invalid-L1 derive of entry A
        assert!(!api.calls().contains(&"create:0:false".to_string()));
    }

    #[tokio::test]
    async fn unverified_credentials_are_never_persisted() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        api.derive.insert((0, false), Ok(creds("bad-key")));
        api.verify_reject = vec!["bad-key".to_string()];

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(!result.success);
        for entry in FALLBACK_LADDER.iter() {
            let key = cache_key(&p, entry.signature_type, entry.use_effective_for_l1);
            assert!(cache.load(&key).is_none());
        }
    }

    #[tokio::test]
    async fn incomplete_credentials_fail_the_attempt() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        api.derive.insert(
            (0, false),
            Ok(ApiKeyCreds {
                key: "k".to_string(),
                secret: String::new(),
                passphrase: "p".to_string(),
            }),
        );

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;
        assert!(!result.success);
        // Incomplete triples are discarded before verification
        assert!(!api.calls().iter().any(|c| c == "verify:k"));
    }

    #[tokio::test]
    async fn never_traded_hint_surfaces_in_failure() {
        let (_dir, cache, mut story) = test_fixtures();
        let p = params();
        let mut api = MockAuthApi::default();
        for sig in [0u8, 1, 2] {
            for eff in [false, true] {
                api.derive.insert((sig, eff), Err(could_not_create()));
                api.create.insert((sig, eff), Err(could_not_create()));
            }
        }

        let result = derive_credentials_with_fallback(&api, &p, &cache, &mut story).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("never traded"));
    }
}
