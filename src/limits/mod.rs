//! Send entitlement: quota and cooldown bookkeeping plus the opt-out list.

use std::borrow::Cow;

pub mod cooldown;
pub mod quota;
pub mod suppression;

pub use cooldown::{CooldownRecord, CooldownStatus, CooldownTracker};
pub use quota::{QuotaLedger, QuotaRecord};
pub use suppression::{SuppressionEntry, SuppressionList, SuppressionReason};

/// Escape an id for use as one `:`-separated segment of a store key.
///
/// `%` and `:` are percent-encoded so distinct id tuples never share a key.
/// Ids without either character pass through unchanged.
pub(crate) fn key_segment(id: &str) -> Cow<'_, str> {
    if !id.contains([':', '%']) {
        return Cow::Borrowed(id);
    }
    Cow::Owned(id.replace('%', "%25").replace(':', "%3A"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ids_are_unchanged() {
        assert_eq!(key_segment("u1"), "u1");
        assert!(matches!(key_segment("acme"), Cow::Borrowed(_)));
    }

    #[test]
    fn delimiter_and_escape_are_encoded() {
        assert_eq!(key_segment("a:b"), "a%3Ab");
        assert_eq!(key_segment("50%"), "50%25");
        // An already-encoded id stays distinct from the raw one.
        assert_ne!(key_segment("a%3Ab"), key_segment("a:b"));
    }
}
