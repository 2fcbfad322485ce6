// incident-core/src/core/identifiers.rs
// ============================================================================
// Module: Incident Core Identifiers
// Description: Canonical opaque identifiers for signals, patterns, issues,
//              decisions, actions, audit entries, and config changes.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Opaque string-based identifiers used throughout the incident pipeline.
//! Identifiers serialize as plain strings; validation (format, uniqueness)
//! is handled at the boundary that assigns them, not within these wrappers.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
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

string_id!(SignalId, "Identifier for a normalized Signal.");
string_id!(PatternId, "Content-derived identifier for a Pattern.");
string_id!(IssueId, "Identifier for an issue aggregate owned by the orchestrator.");
string_id!(DecisionId, "Identifier for a routed Decision.");
string_id!(ActionId, "Identifier for an executable Action.");
string_id!(AuditId, "Identifier for an AuditEntry.");
string_id!(MerchantId, "Identifier for a merchant; \"unknown\" when unresolvable.");
string_id!(SnapshotId, "Identifier for a ConfigSnapshot.");
string_id!(ChangeId, "Identifier for a ConfigChange.");
string_id!(CorrelationId, "Correlation identifier threaded across signals, decisions, and actions.");

#[cfg(test)]
mod tests {
    use super::MerchantId;
    use super::SignalId;

    #[test]
    fn round_trips_through_display_and_from() {
        let id = SignalId::new("sig-1");
        assert_eq!(id.as_str(), "sig-1");
        assert_eq!(id.to_string(), "sig-1");
        let back: SignalId = id.as_str().into();
        assert_eq!(back, id);
    }

    #[test]
    fn distinct_id_types_are_not_interchangeable() {
        let merchant = MerchantId::new("m1");
        let signal = SignalId::new("m1");
        assert_eq!(merchant.as_str(), signal.as_str());
    }
}
