//! Reauthenticating order gateway
//!
//! Credentials can stop working mid-run (revoked key, server-side
//! rotation), at which point every signed call starts answering 401.
//! This gateway wraps the CLOB client's signed submission path: a 401
//! triggers one credential re-derivation through the fallback ladder,
//! reinstalls the session, and retries the order exactly once. A second
//! 401 fails the order instead of looping.

use super::clob::{OrderGateway, OrderReceipt, OrderRequest, SessionApi};
use crate::auth::{
    derive_credentials_with_fallback, resolve_order_identity, AuthStoryBuilder, CredCache,
    IdentityParams, SummaryGate,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct ReauthGateway<C: SessionApi> {
    client: Arc<C>,
    params: IdentityParams,
    cache: CredCache,
    clob_host: String,
    chain_id: u64,
    /// Serializes concurrent recoveries and decides when the auth story
    /// is printed again (only on an auth-ok flip)
    gate: Mutex<SummaryGate>,
}

impl<C: SessionApi> ReauthGateway<C> {
    pub fn new(
        client: Arc<C>,
        params: IdentityParams,
        cache: CredCache,
        clob_host: &str,
        chain_id: u64,
        gate: SummaryGate,
    ) -> Self {
        Self {
            client,
            params,
            cache,
            clob_host: clob_host.to_string(),
            chain_id,
            gate: Mutex::new(gate),
        }
    }

    /// Re-run the fallback ladder and reinstall the session. The stale
    /// cache entry fails its verify probe inside the engine and gets
    /// cleared there, so this is a plain re-derivation.
    async fn reauthenticate(&self) -> Result<()> {
        let mut gate = self.gate.lock().await;

        let mut story = AuthStoryBuilder::new(&self.clob_host, self.chain_id);
        let result = derive_credentials_with_fallback(
            self.client.as_ref(),
            &self.params,
            &self.cache,
            &mut story,
        )
        .await;

        if gate.should_print(result.success) {
            story.print_summary();
        }

        if !result.success {
            anyhow::bail!(
                "Re-derivation after 401 failed: {}",
                result.error.as_deref().unwrap_or("unknown")
            );
        }

        let creds = result
            .creds
            .context("Re-derivation succeeded without credentials")?;
        let signature_type = result
            .signature_type
            .context("Re-derivation succeeded without a signature type")?;
        let order_identity = resolve_order_identity(&self.params, signature_type);

        info!(
            "[Reauth] Session reinstalled ({} as {})",
            signature_type, order_identity.maker_address
        );
        self.client.install_session(creds, order_identity).await;
        Ok(())
    }
}

#[async_trait]
impl<C: SessionApi> OrderGateway for ReauthGateway<C> {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        match self.client.submit_signed(request).await {
            Ok(receipt) => Ok(receipt),
            Err(err) if err.status == Some(401) => {
                warn!(
                    "[Reauth] Signed call rejected ({}), re-deriving credentials",
                    err
                );
                self.reauthenticate().await?;
                self.client
                    .submit_signed(request)
                    .await
                    .map_err(|e| anyhow::anyhow!("Order submission failed after reauth: {}", e))
            }
            Err(err) => Err(anyhow::anyhow!("Order submission failed: {}", err)),
        }
    }
}
