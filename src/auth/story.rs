//! Auth story: one structured diagnostic record per run
//!
//! The builder is constructed once per run and threaded through the
//! derivation engine explicitly; attempts are append-only and the final
//! result is set exactly once at the end. `print_summary` renders the
//! human-readable lines followed by a single JSON block for machine
//! parsing.

use super::fingerprint::{CredentialFingerprint, FingerprintDedup};
use super::identity::SignatureType;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// One ladder (or swap) attempt as recorded in the story
#[derive(Debug, Clone, Serialize)]
pub struct AuthAttempt {
    pub label: String,
    pub signature_type: u8,
    pub use_effective_for_l1: bool,
    pub l1_auth_address: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// This attempt was the one-shot address swap after an invalid-L1 401
    pub swapped: bool,
}

/// Terminal state of a run. Defaults to the sentinel so a story printed
/// mid-run is distinguishable from a completed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FinalResult {
    NotYetDetermined,
    Success {
        signature_type: u8,
        use_effective_for_l1: bool,
    },
    Failure {
        reason: String,
    },
}

/// The full diagnostic record for one run
#[derive(Debug, Clone, Serialize)]
pub struct AuthStory {
    pub run_id: String,
    pub selected_mode: String,
    pub signer_address: String,
    pub maker_address: String,
    pub funder_address: Option<String>,
    pub effective_address: String,
    pub clob_host: String,
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_cred_fingerprint: Option<CredentialFingerprint>,
    pub attempts: Vec<AuthAttempt>,
    pub final_result: FinalResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub onchain_txs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain_blocked: Option<String>,
}

/// Append-only builder for [`AuthStory`]
#[derive(Debug)]
pub struct AuthStoryBuilder {
    story: AuthStory,
    dedup: FingerprintDedup,
}

impl AuthStoryBuilder {
    pub fn new(clob_host: &str, chain_id: u64) -> Self {
        Self {
            story: AuthStory {
                run_id: Uuid::new_v4().to_string(),
                selected_mode: String::new(),
                signer_address: String::new(),
                maker_address: String::new(),
                funder_address: None,
                effective_address: String::new(),
                clob_host: clob_host.to_string(),
                chain_id,
                derived_cred_fingerprint: None,
                attempts: Vec::new(),
                final_result: FinalResult::NotYetDetermined,
                onchain_txs: Vec::new(),
                onchain_blocked: None,
            },
            dedup: FingerprintDedup::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.story.run_id
    }

    pub fn set_identity(
        &mut self,
        mode: &str,
        signer: &str,
        maker: &str,
        funder: Option<&str>,
        effective: &str,
    ) {
        self.story.selected_mode = mode.to_string();
        self.story.signer_address = signer.to_string();
        self.story.maker_address = maker.to_string();
        self.story.funder_address = funder.map(|s| s.to_string());
        self.story.effective_address = effective.to_string();
    }

    /// Record the fingerprint of the credentials the run ended up with.
    /// Detailed fingerprint logging is emitted at most once per distinct
    /// credential set per process.
    pub fn set_credential_fingerprint(&mut self, fingerprint: CredentialFingerprint) {
        if self.dedup.first_sighting(&fingerprint) {
            info!(
                "[AuthStory] Credentials: key …{} secret_len={} encoding={}",
                fingerprint.api_key_suffix,
                fingerprint.secret_len,
                fingerprint.secret_encoding_guess
            );
        }
        self.story.derived_cred_fingerprint = Some(fingerprint);
    }

    pub fn add_attempt(&mut self, attempt: AuthAttempt) {
        self.story.attempts.push(attempt);
    }

    pub fn add_onchain_tx(&mut self, tx_id: &str) {
        self.story.onchain_txs.push(tx_id.to_string());
    }

    pub fn set_onchain_blocked(&mut self, reason: &str) {
        self.story.onchain_blocked = Some(reason.to_string());
    }

    /// Set the terminal result. First write wins; later calls are ignored
    /// so the one-shot semantics survive sloppy callers.
    pub fn set_final_result(&mut self, result: FinalResult) {
        if self.story.final_result == FinalResult::NotYetDetermined {
            self.story.final_result = result;
        }
    }

    pub fn story(&self) -> &AuthStory {
        &self.story
    }

    pub fn attempt_count(&self) -> usize {
        self.story.attempts.len()
    }

    /// Render the human summary lines followed by the single JSON block
    pub fn print_summary(&self) {
        let s = &self.story;
        println!("── auth story ({}) ──", s.run_id);
        println!("  mode:      {}", s.selected_mode);
        println!("  signer:    {}", s.signer_address);
        println!("  effective: {}", s.effective_address);
        for a in &s.attempts {
            let marker = if a.success { "ok" } else { "fail" };
            let swap = if a.swapped { " (swapped)" } else { "" };
            match (&a.error, a.status_code) {
                (Some(err), Some(code)) => {
                    println!("  [{}] {}{}: {} {}", marker, a.label, swap, code, err)
                }
                (Some(err), None) => println!("  [{}] {}{}: {}", marker, a.label, swap, err),
                _ => println!("  [{}] {}{}", marker, a.label, swap),
            }
        }
        match &s.final_result {
            FinalResult::NotYetDetermined => println!("  result: pending"),
            FinalResult::Success { signature_type, .. } => {
                println!(
                    "  result: authenticated (signature type {})",
                    signature_type
                )
            }
            FinalResult::Failure { reason } => println!("  result: FAILED: {}", reason),
        }
        // Exactly one machine-parsable block per run
        match serde_json::to_string(&s) {
            Ok(json) => println!("AUTH_STORY {}", json),
            Err(e) => println!("AUTH_STORY {{\"error\":\"serialize failed: {}\"}}", e),
        }
    }
}

/// Gate deciding whether a full summary print is warranted: always on
/// first evaluation, afterwards only when the overall auth-ok flag flips.
#[derive(Debug, Default)]
pub struct SummaryGate {
    last_auth_ok: Option<bool>,
}

impl SummaryGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_print(&mut self, auth_ok: bool) -> bool {
        let print = self.last_auth_ok != Some(auth_ok);
        self.last_auth_ok = Some(auth_ok);
        print
    }
}
