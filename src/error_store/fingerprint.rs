use crate::models::ComponentKind;
use sha2::{Digest, Sha256};

/// Stable grouping key for an error class.
///
/// Hashes `component:operation:error_kind:message`. Fields are
/// length-prefixed so that moving a `:` between fields cannot produce the
/// same digest.
pub fn fingerprint(component: ComponentKind, operation: &str, error_kind: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [component.to_string().as_str(), operation, error_kind, message] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
        hasher.update(b":");
    }

    let digest = hasher.finalize();
    // 128 bits is plenty for grouping
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}
