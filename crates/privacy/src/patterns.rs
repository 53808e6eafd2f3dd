//! PII pattern table.
//!
//! Each pattern is a regex plus a placeholder label. Patterns compile once
//! into a process-wide table; a pattern that fails to compile is skipped
//! for the rest of the process lifetime with a single warning, so a bad
//! pattern can never block a request.

use std::sync::LazyLock;

use regex::Regex;

use tb_domain::config::PrivacyLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Phone,
    Email,
    Ssn,
    CreditCard,
    Address,
    Mrn,
    Account,
    Routing,
    Ip,
    Zip,
    PersonName,
}

impl PatternKind {
    /// Placeholder label, e.g. `PHONE` in `[PHONE_REDACTED]_0`.
    pub fn label(&self) -> &'static str {
        match self {
            PatternKind::Phone => "PHONE",
            PatternKind::Email => "EMAIL",
            PatternKind::Ssn => "SSN",
            PatternKind::CreditCard => "CARD",
            PatternKind::Address => "ADDRESS",
            PatternKind::Mrn => "MRN",
            PatternKind::Account => "ACCOUNT",
            PatternKind::Routing => "ROUTING",
            PatternKind::Ip => "IP",
            PatternKind::Zip => "ZIP",
            PatternKind::PersonName => "NAME",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            PatternKind::Phone => {
                r"(?:\+1[-. ]?)?(?:\(\d{3}\)\s?|\d{3}[-. ])\d{3}[-. ]\d{4}\b"
            }
            PatternKind::Email => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            PatternKind::Ssn => r"\b\d{3}-\d{2}-\d{4}\b",
            PatternKind::CreditCard => r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b",
            PatternKind::Address => {
                r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s+)+(?:St|Street|Ave|Avenue|Blvd|Boulevard|Dr|Drive|Ln|Lane|Rd|Road|Ct|Court|Way|Pl|Place)\b\.?"
            }
            PatternKind::Mrn => r"(?i)\bmrn\s*#?\s*:?\s*\d{5,12}\b",
            PatternKind::Account => r"(?i)\b(?:acct|account)\s*#?\s*:?\s*\d{6,17}\b",
            PatternKind::Routing => r"\b\d{9}\b",
            PatternKind::Ip => r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
            PatternKind::Zip => r"\b\d{5}(?:-\d{4})?\b",
            // Simple two-capitalized-word heuristic. Noisy, so only the
            // strict level enables it.
            PatternKind::PersonName => r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled table & level subsets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scan order. More specific / longer patterns run before the generic
/// digit patterns so a phone number is not first chewed up as a ZIP.
const SCAN_ORDER: &[PatternKind] = &[
    PatternKind::Phone,
    PatternKind::Email,
    PatternKind::Ssn,
    PatternKind::CreditCard,
    PatternKind::Address,
    PatternKind::Mrn,
    PatternKind::Account,
    PatternKind::Routing,
    PatternKind::Ip,
    PatternKind::Zip,
    PatternKind::PersonName,
];

static COMPILED: LazyLock<Vec<(PatternKind, Option<Regex>)>> = LazyLock::new(|| {
    SCAN_ORDER
        .iter()
        .map(|&kind| match Regex::new(kind.pattern()) {
            Ok(re) => (kind, Some(re)),
            Err(e) => {
                tracing::warn!(kind = kind.label(), error = %e, "PII pattern failed to compile, skipping");
                (kind, None)
            }
        })
        .collect()
});

fn enabled(kind: PatternKind, level: PrivacyLevel) -> bool {
    use PatternKind::*;
    match level {
        PrivacyLevel::Off => false,
        PrivacyLevel::Basic => matches!(kind, Phone | Email | Ssn | CreditCard),
        PrivacyLevel::Standard => !matches!(kind, PersonName),
        PrivacyLevel::Strict => true,
    }
}

/// The compiled patterns active at `level`, in scan order.
pub fn patterns_for(level: PrivacyLevel) -> Vec<(PatternKind, &'static Regex)> {
    COMPILED
        .iter()
        .filter(|(kind, _)| enabled(*kind, level))
        .filter_map(|(kind, re)| re.as_ref().map(|re| (*kind, re)))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(kind: PatternKind, text: &str) -> bool {
        Regex::new(kind.pattern()).unwrap().is_match(text)
    }

    #[test]
    fn phone_variants() {
        assert!(matches(PatternKind::Phone, "555-123-4567"));
        assert!(matches(PatternKind::Phone, "(555) 123-4567"));
        assert!(matches(PatternKind::Phone, "+1 555-123-4567"));
        assert!(!matches(PatternKind::Phone, "1234"));
    }

    #[test]
    fn email_variants() {
        assert!(matches(PatternKind::Email, "a@b.com"));
        assert!(matches(PatternKind::Email, "first.last+tag@sub.example.org"));
        assert!(!matches(PatternKind::Email, "not-an-email"));
    }

    #[test]
    fn ssn_and_card() {
        assert!(matches(PatternKind::Ssn, "078-05-1120"));
        assert!(matches(PatternKind::CreditCard, "4111 1111 1111 1111"));
        assert!(matches(PatternKind::CreditCard, "4111-1111-1111-1111"));
    }

    #[test]
    fn address_and_zip() {
        assert!(matches(PatternKind::Address, "742 Evergreen Terrace Ln"));
        assert!(matches(PatternKind::Address, "1600 Pennsylvania Ave"));
        assert!(matches(PatternKind::Zip, "90210"));
        assert!(matches(PatternKind::Zip, "90210-1234"));
    }

    #[test]
    fn level_subsets_nest() {
        let basic = patterns_for(tb_domain::config::PrivacyLevel::Basic).len();
        let standard = patterns_for(tb_domain::config::PrivacyLevel::Standard).len();
        let strict = patterns_for(tb_domain::config::PrivacyLevel::Strict).len();
        assert!(basic < standard);
        assert!(standard < strict);
        assert!(patterns_for(tb_domain::config::PrivacyLevel::Off).is_empty());
    }

    #[test]
    fn name_heuristic_only_in_strict() {
        let standard = patterns_for(tb_domain::config::PrivacyLevel::Standard);
        assert!(!standard.iter().any(|(k, _)| *k == PatternKind::PersonName));
        let strict = patterns_for(tb_domain::config::PrivacyLevel::Strict);
        assert!(strict.iter().any(|(k, _)| *k == PatternKind::PersonName));
    }
}
