//! The credential fallback ladder
//!
//! A fixed, ordered table of (signature type, L1 address choice)
//! combinations tried until one yields verified credentials. The order
//! encodes prior probability: EOA wallets are most common, Safe wallets
//! next, Proxy wallets last, and within each the signer address is tried
//! before the effective address. Do not permute the entries.

use super::identity::SignatureType;

/// One rung of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackAttempt {
    pub signature_type: SignatureType,
    /// Authenticate L1 with the effective (funds-holding) address instead
    /// of the raw signer address
    pub use_effective_for_l1: bool,
    pub label: &'static str,
}

/// The full ladder, in the order the engine walks it
pub const FALLBACK_LADDER: [FallbackAttempt; 5] = [
    FallbackAttempt {
        signature_type: SignatureType::Eoa,
        use_effective_for_l1: false,
        label: "A: EOA, signer auth",
    },
    FallbackAttempt {
        signature_type: SignatureType::Safe,
        use_effective_for_l1: false,
        label: "B: Safe, signer auth",
    },
    FallbackAttempt {
        signature_type: SignatureType::Safe,
        use_effective_for_l1: true,
        label: "C: Safe, effective auth",
    },
    FallbackAttempt {
        signature_type: SignatureType::Proxy,
        use_effective_for_l1: false,
        label: "D: Proxy, signer auth",
    },
    FallbackAttempt {
        signature_type: SignatureType::Proxy,
        use_effective_for_l1: true,
        label: "E: Proxy, effective auth",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_order_is_exactly_the_documented_table() {
        let declared: Vec<(SignatureType, bool)> = FALLBACK_LADDER
            .iter()
            .map(|a| (a.signature_type, a.use_effective_for_l1))
            .collect();

        assert_eq!(
            declared,
            vec![
                (SignatureType::Eoa, false),
                (SignatureType::Safe, false),
                (SignatureType::Safe, true),
                (SignatureType::Proxy, false),
                (SignatureType::Proxy, true),
            ]
        );
    }

    #[test]
    fn labels_are_distinct() {
        let mut labels: Vec<&str> = FALLBACK_LADDER.iter().map(|a| a.label).collect();
        labels.dedup();
        assert_eq!(labels.len(), FALLBACK_LADDER.len());
    }
}
