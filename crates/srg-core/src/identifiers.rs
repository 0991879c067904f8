// crates/srg-core/src/identifiers.rs
// ============================================================================
// Module: Gateway Identifiers
// Description: Canonical opaque identifiers threaded through the pipeline.
// Purpose: Provide strongly typed, serializable ids with stable string forms
//          and a dependency-free random id generator.
// Dependencies: serde, rand
// ============================================================================

//! ## Overview
//! This module defines the string-based identifiers used throughout the
//! gateway. Identifiers are opaque and serialize as strings; validation of
//! caller-supplied header values happens at the ingress boundary, not here.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;

macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the owned string.
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(RequestId, "Identifier for a single inbound request, preserved in every downstream record.");
string_id!(TenantId, "Tenant identifier scoped from the trusted `x-srg-tenant-id` header.");
string_id!(UserId, "Caller identifier scoped from the trusted `x-srg-user-id` header.");
string_id!(TraceId, "Trace identifier; equal to the owning request's [`RequestId`].");
string_id!(SpanId, "Identifier for a single span within a trace.");
string_id!(EventId, "Identifier for a single audit event.");
string_id!(DecisionId, "Identifier for a single policy decision.");
string_id!(SourceId, "Identifier for a document source referenced by a retrieved chunk.");
string_id!(ChunkId, "Identifier for a single retrieved document chunk.");

/// Generates a UUIDv4-shaped lowercase hex identifier without pulling in a
/// dedicated UUID crate, matching the random-id idiom already used for
/// correlation ids elsewhere in this codebase.
#[must_use]
pub fn generate_uuid_v4() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format_uuid_bytes(&bytes)
}

fn format_uuid_bytes(bytes: &[u8; 16]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(36);
    for (index, byte) in bytes.iter().enumerate() {
        if index == 4 || index == 6 || index == 8 || index == 10 {
            out.push('-');
        }
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Generates a new random [`RequestId`].
#[must_use]
pub fn generate_request_id() -> RequestId {
    RequestId::new(generate_uuid_v4())
}

/// Generates a new random [`EventId`].
#[must_use]
pub fn generate_event_id() -> EventId {
    EventId::new(generate_uuid_v4())
}

/// Generates a new random [`SpanId`] as a 16-hex-character value, matching
/// the OTLP span-id width.
#[must_use]
pub fn generate_span_id() -> SpanId {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(16);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    SpanId::new(out)
}

#[cfg(test)]
mod tests {
    use super::generate_uuid_v4;
    use super::TenantId;

    #[test]
    fn uuid_has_expected_shape() {
        let id = generate_uuid_v4();
        assert_eq!(id.len(), 36);
        assert_eq!(id.chars().filter(|c| *c == '-').count(), 4);
        assert_eq!(id.as_bytes()[14], b'4');
    }

    #[test]
    fn tenant_id_roundtrips_display() {
        let tenant = TenantId::new("tenant-a");
        assert_eq!(tenant.as_str(), "tenant-a");
        assert_eq!(tenant.to_string(), "tenant-a");
    }
}
