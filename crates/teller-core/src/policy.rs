//! Transfer fraud policy: threshold flagging and recipient allowlisting.
//!
//! A transfer is *flagged* when its amount is strictly greater than the
//! policy threshold. Flagged transfers only proceed when the recipient is
//! on the guardian's approved-recipient list, compared in digits-only
//! canonical form so `"9876-5432-10"` and `"987654 3210"` match.
//!
//! The flag is derived at redemption time and never persisted on the
//! action: editing the approved list or the threshold affects outstanding
//! not-yet-redeemed actions.

use crate::money::Amount;

/// Canonicalizes an account number for comparison: ASCII digits only.
#[must_use]
pub fn normalize_account_number(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Fraud gate configuration for recipient transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FraudPolicy {
    /// Monetary cutoff above which transfers require an approved
    /// recipient. The comparison is strict: a transfer of exactly the
    /// threshold is not flagged.
    pub threshold: Amount,
}

impl Default for FraudPolicy {
    fn default() -> Self {
        Self {
            threshold: Amount::from_major(300),
        }
    }
}

impl FraudPolicy {
    /// True when `amount` requires recipient approval.
    #[must_use]
    pub fn flags(&self, amount: Amount) -> bool {
        amount > self.threshold
    }

    /// True when `recipient` matches an entry of `approved` after both
    /// sides are normalized to digits. A recipient that normalizes to the
    /// empty string never matches.
    #[must_use]
    pub fn recipient_approved(&self, approved: &[String], recipient: &str) -> bool {
        let wanted = normalize_account_number(recipient);
        if wanted.is_empty() {
            return false;
        }
        approved
            .iter()
            .any(|entry| normalize_account_number(entry) == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_separators() {
        assert_eq!(normalize_account_number("9876-5432-10"), "9876543210");
        assert_eq!(normalize_account_number("  987 654 3210 "), "9876543210");
        assert_eq!(normalize_account_number("no digits"), "");
    }

    #[test]
    fn test_threshold_is_strict() {
        let policy = FraudPolicy::default();
        assert!(!policy.flags("300.00".parse().unwrap()));
        assert!(policy.flags("300.01".parse().unwrap()));
    }

    #[test]
    fn test_recipient_matching_is_digits_only() {
        let policy = FraudPolicy::default();
        let approved = vec!["9876-5432-10".to_string(), "111222333".to_string()];
        assert!(policy.recipient_approved(&approved, "987654 3210"));
        assert!(policy.recipient_approved(&approved, "111222333"));
        assert!(!policy.recipient_approved(&approved, "999999999"));
    }

    #[test]
    fn test_empty_normalized_recipient_never_matches() {
        let policy = FraudPolicy::default();
        let approved = vec![String::new(), "---".to_string()];
        assert!(!policy.recipient_approved(&approved, "---"));
        assert!(!policy.recipient_approved(&approved, ""));
    }
}
