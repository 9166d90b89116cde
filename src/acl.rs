use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, warn};

use crate::error::FilterError;

/// Keyed lookup against the sender authorization policy store.
///
/// Implementations answer one question: who is the recorded owner of a
/// candidate sender address? `None` means the store has no entry, which is
/// a denial, not an error. A lookup that cannot be completed at all is
/// [`FilterError::AclUnavailable`]; the filter fails closed on it.
pub trait SenderAcl {
    fn lookup_owner(&self, address: &str) -> Result<Option<String>, FilterError>;
}

/// Policy store lookup through Postfix's `postmap -q` against a configured
/// sender ACL map.
pub struct PostmapAcl {
    postmap_bin: PathBuf,
    map_spec: String,
}

impl PostmapAcl {
    pub fn new(postmap_bin: PathBuf, map_spec: String) -> Self {
        Self {
            postmap_bin,
            map_spec,
        }
    }
}

impl SenderAcl for PostmapAcl {
    fn lookup_owner(&self, address: &str) -> Result<Option<String>, FilterError> {
        let key = address.to_lowercase();
        debug!(key = %key, map = %self.map_spec, "Querying sender ACL");

        let output = Command::new(&self.postmap_bin)
            .arg("-q")
            .arg(&key)
            .arg(&self.map_spec)
            .output()
            .map_err(|e| {
                FilterError::AclUnavailable(format!(
                    "failed to run {}: {}",
                    self.postmap_bin.display(),
                    e
                ))
            })?;

        match output.status.code() {
            Some(0) => {
                let owner = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(Some(owner))
            }
            // postmap exits 1 when the key has no entry.
            Some(1) => Ok(None),
            _ => Err(FilterError::AclUnavailable(format!(
                "postmap exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Checks whether `authenticated_as` may send as `candidate`: the recorded
/// owner must match the authenticated identity, compared case-insensitively.
pub fn is_authorized(
    acl: &dyn SenderAcl,
    candidate: &str,
    authenticated_as: &str,
) -> Result<bool, FilterError> {
    let owner = acl.lookup_owner(candidate)?;
    match owner {
        Some(owner) if owner.to_lowercase() == authenticated_as.to_lowercase() => Ok(true),
        Some(owner) => {
            warn!(
                candidate = %candidate,
                owner = %owner,
                authenticated_as = %authenticated_as,
                "Auth failure: recorded owner does not match authenticated identity"
            );
            Ok(false)
        }
        None => {
            warn!(
                candidate = %candidate,
                authenticated_as = %authenticated_as,
                "Auth failure: no ACL entry for candidate address"
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAcl(Option<String>);

    impl SenderAcl for FixedAcl {
        fn lookup_owner(&self, _address: &str) -> Result<Option<String>, FilterError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenAcl;

    impl SenderAcl for BrokenAcl {
        fn lookup_owner(&self, _address: &str) -> Result<Option<String>, FilterError> {
            Err(FilterError::AclUnavailable("store down".to_string()))
        }
    }

    #[test]
    fn test_matching_owner_is_authorized() {
        let acl = FixedAcl(Some("alice@example.com".to_string()));
        assert!(is_authorized(&acl, "alice@mkt.example.com", "alice@example.com").unwrap());
    }

    #[test]
    fn test_owner_comparison_is_case_insensitive() {
        let acl = FixedAcl(Some("Alice@Example.COM".to_string()));
        assert!(is_authorized(&acl, "alice@mkt.example.com", "alice@example.com").unwrap());
    }

    #[test]
    fn test_mismatched_owner_is_denied() {
        let acl = FixedAcl(Some("alice@example.com".to_string()));
        assert!(!is_authorized(&acl, "alice@mkt.example.com", "bob").unwrap());
    }

    #[test]
    fn test_missing_entry_is_denied_not_an_error() {
        let acl = FixedAcl(None);
        assert!(!is_authorized(&acl, "alice@mkt.example.com", "alice@example.com").unwrap());
    }

    #[test]
    fn test_unreachable_store_fails_closed() {
        let err = is_authorized(&BrokenAcl, "a@b.example", "alice").unwrap_err();
        assert!(matches!(err, FilterError::AclUnavailable(_)));
    }
}
