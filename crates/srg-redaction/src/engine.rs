// crates/srg-redaction/src/engine.rs
// ============================================================================
// Module: Redaction Engine
// Description: Applies the fixed pattern catalog to inbound/outbound
//              content, accumulating hit counts.
// Purpose: Mask PHI/PII/financial content both directions of traffic.
// Dependencies: srg-core
// ============================================================================

use std::collections::BTreeSet;

use srg_core::model::ChatMessage;

use crate::patterns::Category;
use crate::patterns::CATALOG;

/// Result of redacting a single string.
#[derive(Debug, Clone)]
pub struct TextRedactionResult {
    /// Text after all patterns have been applied.
    pub text: String,
    /// Total substitution count across all patterns.
    pub count: usize,
    /// Distinct categories that matched.
    pub matched_categories: BTreeSet<&'static str>,
}

/// Result of redacting a list of chat messages.
#[derive(Debug, Clone)]
pub struct MessagesRedactionResult {
    /// Messages with redacted content; roles are unchanged.
    pub messages: Vec<ChatMessage>,
    /// Total substitution count across all messages.
    pub redaction_count: usize,
    /// Distinct categories that matched across all messages.
    pub categories: BTreeSet<&'static str>,
}

/// Stateless engine applying the fixed pattern catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedactionEngine;

impl RedactionEngine {
    /// Creates a new redaction engine. Stateless; cheap to construct per
    /// call if preferred.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Redacts a single string, applying every pattern in catalog order.
    #[must_use]
    pub fn redact_text(&self, text: &str) -> TextRedactionResult {
        let mut redacted = text.to_string();
        let mut count = 0usize;
        let mut matched_categories = BTreeSet::new();

        for pattern in CATALOG {
            let before = redacted.clone();
            let after = pattern.regex.replace_all(&before, pattern.replacement);
            if after != before {
                let hits = pattern.regex.find_iter(&before).count();
                count += hits;
                matched_categories.insert(category_label(pattern.category));
                redacted = after.into_owned();
            }
        }

        TextRedactionResult { text: redacted, count, matched_categories }
    }

    /// Redacts a list of chat messages, leaving roles untouched.
    #[must_use]
    pub fn redact_messages(&self, messages: &[ChatMessage]) -> MessagesRedactionResult {
        let mut redacted_messages = Vec::with_capacity(messages.len());
        let mut redaction_count = 0usize;
        let mut categories = BTreeSet::new();

        for message in messages {
            let result = self.redact_text(&message.content);
            redaction_count += result.count;
            categories.extend(result.matched_categories);
            redacted_messages.push(ChatMessage {
                role: message.role,
                content: result.text,
                citations: message.citations.clone(),
            });
        }

        MessagesRedactionResult { messages: redacted_messages, redaction_count, categories }
    }
}

const fn category_label(category: Category) -> &'static str {
    category.as_str()
}

#[cfg(test)]
mod tests {
    use super::RedactionEngine;
    use srg_core::model::ChatMessage;
    use srg_core::model::ChatRole;

    #[test]
    fn masks_dob_and_phone_and_mrn() {
        let engine = RedactionEngine::new();
        let result = engine.redact_text("DOB 01/01/1990 phone 555-123-4567 MRN 123456");
        assert!(result.count >= 2);
        assert!(result.text.contains("REDACTED"));
    }

    #[test]
    fn redaction_is_idempotent() {
        let engine = RedactionEngine::new();
        let once = engine.redact_text("patient ssn 123-45-6789");
        let twice = engine.redact_text(&once.text);
        assert_eq!(once.text, twice.text);
    }

    #[test]
    fn preserves_roles_across_messages() {
        let engine = RedactionEngine::new();
        let messages = vec![ChatMessage {
            role: ChatRole::User,
            content: "email me at jane@example.com".to_string(),
            citations: None,
        }];
        let result = engine.redact_messages(&messages);
        assert_eq!(result.messages[0].role, ChatRole::User);
        assert!(result.messages[0].content.contains("[EMAIL_REDACTED]"));
        assert_eq!(result.redaction_count, 1);
    }
}
