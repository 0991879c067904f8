// crates/srg-redaction/src/patterns.rs
// ============================================================================
// Module: Pattern Catalog
// Description: The fixed, ordered regex pattern catalog the redaction
//              engine applies to inbound and outbound content.
// Purpose: Mask PHI/PII/financial substrings with deterministic, golden-
//          testable replacements.
// Dependencies: regex
// ============================================================================

//! ## Overview
//! Patterns are evaluated strictly in catalog order. Hits accumulate and
//! the redacted text from one pattern feeds into the next, so ordering
//! resolves ambiguity between overlapping formats (e.g. a credit-card
//! number and a UK phone number can share a digit-grouping shape). The
//! order below is canonical: most structurally specific first.

use std::sync::LazyLock;

use regex::Regex;

/// Sensitivity category a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Protected health information.
    Phi,
    /// Personally identifiable information.
    Pii,
    /// Financial account/instrument data.
    Financial,
}

impl Category {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phi => "phi",
            Self::Pii => "pii",
            Self::Financial => "financial",
        }
    }
}

/// One entry in the redaction catalog.
pub struct Pattern {
    /// Stable name, used to derive the replacement token.
    pub name: &'static str,
    /// Compiled regular expression.
    pub regex: &'static LazyLock<Regex>,
    /// Fixed replacement string, e.g. `"[SSN_REDACTED]"`.
    pub replacement: &'static str,
    /// Sensitivity category.
    pub category: Category,
}

macro_rules! pattern_regex {
    ($name:ident, $pat:literal) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| {
            #[allow(clippy::unwrap_used, reason = "pattern is a compile-time constant")]
            Regex::new($pat).unwrap()
        });
    };
}

pattern_regex!(MRN_RE, r"(?i)\bMRN[:\s-]*\d{6,10}\b");
pattern_regex!(NHS_RE, r"\b\d{3}[\s-]?\d{3}[\s-]?\d{4}\b");
pattern_regex!(NATIONAL_INSURANCE_RE, r"(?i)\b[A-Z]{2}\d{6}[A-D]\b");
pattern_regex!(SSN_RE, r"\b\d{3}-\d{2}-\d{4}\b");
pattern_regex!(CREDIT_CARD_RE, r"\b(?:\d[ -]?){13,19}\b");
pattern_regex!(DOB_RE, r"(?i)\b(?:DOB[:\s-]*)?\d{2}[/-]\d{2}[/-]\d{4}\b");
pattern_regex!(PHONE_US_RE, r"\b(?:\+1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b");
pattern_regex!(PHONE_UK_RE, r"(?i)\b(?:\+44\s?|0)(?:\d\s?){9,10}\b");
pattern_regex!(
    EMAIL_RE,
    r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b"
);

/// The canonical ordered pattern catalog. Golden tests assert against this
/// exact order.
pub static CATALOG: &[Pattern] = &[
    Pattern { name: "mrn", regex: &MRN_RE, replacement: "[MRN_REDACTED]", category: Category::Phi },
    Pattern { name: "nhs_number", regex: &NHS_RE, replacement: "[NHS_NUMBER_REDACTED]", category: Category::Phi },
    Pattern {
        name: "national_insurance",
        regex: &NATIONAL_INSURANCE_RE,
        replacement: "[NATIONAL_INSURANCE_REDACTED]",
        category: Category::Pii,
    },
    Pattern { name: "ssn", regex: &SSN_RE, replacement: "[SSN_REDACTED]", category: Category::Pii },
    Pattern {
        name: "credit_card",
        regex: &CREDIT_CARD_RE,
        replacement: "[CREDIT_CARD_REDACTED]",
        category: Category::Financial,
    },
    Pattern { name: "dob", regex: &DOB_RE, replacement: "[DOB_REDACTED]", category: Category::Phi },
    Pattern { name: "phone_us", regex: &PHONE_US_RE, replacement: "[PHONE_REDACTED]", category: Category::Pii },
    Pattern { name: "phone_uk", regex: &PHONE_UK_RE, replacement: "[PHONE_REDACTED]", category: Category::Pii },
    Pattern { name: "email", regex: &EMAIL_RE, replacement: "[EMAIL_REDACTED]", category: Category::Pii },
];

#[cfg(test)]
mod tests {
    use super::CATALOG;

    #[test]
    fn catalog_order_is_canonical() {
        let names: Vec<&str> = CATALOG.iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "mrn",
                "nhs_number",
                "national_insurance",
                "ssn",
                "credit_card",
                "dob",
                "phone_us",
                "phone_uk",
                "email",
            ]
        );
    }
}
