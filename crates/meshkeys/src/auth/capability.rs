use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The operator-configured superuser secret.
///
/// Only a digest is kept, so comparisons run over fixed-length input
/// regardless of what the caller presents.
pub struct MasterKey {
    digest: Option<[u8; 32]>,
}

impl MasterKey {
    /// An empty secret disables the capability.
    pub fn new(secret: &str) -> Self {
        if secret.is_empty() {
            return Self { digest: None };
        }
        Self { digest: Some(Sha256::digest(secret.as_bytes()).into()) }
    }

    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    pub fn matches(&self, presented: &str) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        presented.ct_eq(expected).into()
    }
}
