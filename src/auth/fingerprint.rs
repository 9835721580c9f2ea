//! Credential fingerprinting for safe diagnostics
//!
//! A fingerprint is an irreversible summary of a credential set: key
//! suffix, field lengths, and a guess at the secret's encoding. It is
//! what gets logged and what deduplicates repeated diagnostic output;
//! raw secret material never leaves this module.

use super::ApiKeyCreds;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Upper bound on the dedup set before it is cleared wholesale
const DEDUP_MAX_ENTRIES: usize = 256;

/// Safe-to-log summary of an [`ApiKeyCreds`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialFingerprint {
    pub api_key_suffix: String,
    pub secret_len: usize,
    pub passphrase_len: usize,
    pub secret_encoding_guess: &'static str,
}

impl CredentialFingerprint {
    pub fn of(creds: &ApiKeyCreds) -> Self {
        // Last six characters, not bytes; server-supplied keys are not
        // guaranteed ASCII and a mid-codepoint byte slice panics.
        let suffix_start = creds
            .key
            .char_indices()
            .rev()
            .take(6)
            .last()
            .map_or(0, |(i, _)| i);
        Self {
            api_key_suffix: creds.key[suffix_start..].to_string(),
            secret_len: creds.secret.len(),
            passphrase_len: creds.passphrase.len(),
            secret_encoding_guess: guess_secret_encoding(&creds.secret),
        }
    }

    /// Stable hash used as the dedup key
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key_suffix.as_bytes());
        hasher.update(self.secret_len.to_le_bytes());
        hasher.update(self.passphrase_len.to_le_bytes());
        hasher.update(self.secret_encoding_guess.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Guess how a secret is encoded from its alphabet.
///
/// `-`/`_` only appear in the base64url alphabet; `+`/`/` and `=`
/// padding only in standard base64. A purely alphanumeric secret is
/// indistinguishable, so base64 is assumed.
pub fn guess_secret_encoding(secret: &str) -> &'static str {
    if secret.contains('-') || secret.contains('_') {
        return "base64url";
    }
    if secret.contains('+') || secret.contains('/') || secret.ends_with('=') {
        return "base64";
    }
    if !secret.is_empty() && secret.chars().all(|c| c.is_ascii_alphanumeric()) {
        return "base64"; // heuristic: could be either, standard is more common
    }
    "raw"
}

/// Process-lifetime dedup set for fingerprinted diagnostic output.
///
/// Bounded: once the set passes [`DEDUP_MAX_ENTRIES`] it is cleared in
/// full rather than evicted piecemeal, which is enough to keep a
/// long-running process from growing without bound.
#[derive(Debug, Default)]
pub struct FingerprintDedup {
    seen: HashSet<String>,
}

impl FingerprintDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a fingerprint is seen
    pub fn first_sighting(&mut self, fingerprint: &CredentialFingerprint) -> bool {
        if self.seen.len() >= DEDUP_MAX_ENTRIES {
            self.seen.clear();
        }
        self.seen.insert(fingerprint.dedup_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(secret: &str) -> ApiKeyCreds {
        ApiKeyCreds {
            key: "0123456789abcdef".to_string(),
            secret: secret.to_string(),
            passphrase: "pass".to_string(),
        }
    }

    #[test]
    fn encoding_guess_table() {
        assert_eq!(guess_secret_encoding("abc-def_ghi"), "base64url");
        assert_eq!(guess_secret_encoding("abc+def/ghi"), "base64");
        assert_eq!(guess_secret_encoding("abcdefgh="), "base64");
        assert_eq!(guess_secret_encoding("abcDEF123"), "base64");
        assert_eq!(guess_secret_encoding("abc def!"), "raw");
        assert_eq!(guess_secret_encoding(""), "raw");
    }

    #[test]
    fn url_safe_chars_win_over_padding() {
        // base64url with padding still counts as base64url
        assert_eq!(guess_secret_encoding("ab-cd_ef="), "base64url");
    }

    #[test]
    fn fingerprint_never_contains_secret() {
        let c = creds("supersecretvalue");
        let fp = CredentialFingerprint::of(&c);
        assert_eq!(fp.api_key_suffix, "abcdef");
        assert_eq!(fp.secret_len, 16);
        assert_eq!(fp.passphrase_len, 4);
        let json = serde_json::to_string(&fp).unwrap();
        assert!(!json.contains("supersecretvalue"));
    }

    #[test]
    fn short_key_suffix_is_whole_key() {
        let c = ApiKeyCreds {
            key: "abc".to_string(),
            secret: "s".to_string(),
            passphrase: "p".to_string(),
        };
        assert_eq!(CredentialFingerprint::of(&c).api_key_suffix, "abc");
    }

    #[test]
    fn dedup_reports_first_sighting_only() {
        let mut dedup = FingerprintDedup::new();
        let fp = CredentialFingerprint::of(&creds("secret-one"));
        assert!(dedup.first_sighting(&fp));
        assert!(!dedup.first_sighting(&fp));

        let other = CredentialFingerprint::of(&creds("another+secret"));
        assert!(dedup.first_sighting(&other));
    }

    #[test]
    fn dedup_clears_when_full() {
        // Distinct key suffixes, so every fingerprint hashes differently.
        // Varying only the secret would not: same length and encoding
        // guess collapse to the same dedup hash.
        let keyed = |i: usize| ApiKeyCreds {
            key: format!("key-{:06}", i),
            secret: "s".to_string(),
            passphrase: "p".to_string(),
        };
        let mut dedup = FingerprintDedup::new();
        for i in 0..DEDUP_MAX_ENTRIES {
            let fp = CredentialFingerprint::of(&keyed(i));
            assert!(dedup.first_sighting(&fp), "entry {} was not fresh", i);
        }
        // Set is full; the next insert clears it, so a repeat reports fresh
        let fp = CredentialFingerprint::of(&keyed(0));
        assert!(dedup.first_sighting(&fp));
    }

    #[test]
    fn non_ascii_key_suffix_does_not_panic() {
        let c = ApiKeyCreds {
            key: "€€€€abcde".to_string(),
            secret: "s".to_string(),
            passphrase: "p".to_string(),
        };
        assert_eq!(CredentialFingerprint::of(&c).api_key_suffix, "€abcde");
    }
}
