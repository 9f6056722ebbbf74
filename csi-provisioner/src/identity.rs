//! Provisioner identity.
//!
//! Every process generates one [`Identity`] at startup and stamps it on the
//! volumes it creates.  The tag is advisory: it tells a later deletion which
//! provisioner made the volume, it never serializes access to anything.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exclusive upper bound of the random component.
const RANDOM_RANGE: u32 = 10_000;

/// Immutable, process-unique provisioner identity of the form
/// `<unix-millis>-<random>-<provisioner name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Generate a fresh identity for the provisioner called `provisioner_name`.
    pub fn generate(provisioner_name: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = rand::rng().random_range(0..RANDOM_RANGE);
        Self(format!("{millis}-{suffix}-{provisioner_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provisioner name embedded in an identity tag, or `None` when the tag
    /// is not of the generated form.
    ///
    /// Works on any tag string so that tags written by other processes can
    /// be inspected.
    pub fn provisioner_name_of(tag: &str) -> Option<&str> {
        let mut parts = tag.splitn(3, '-');
        let millis = parts.next()?;
        let suffix = parts.next()?;
        let name = parts.next()?;
        let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        (numeric(millis) && numeric(suffix) && !name.is_empty()).then_some(name)
    }

    /// Provisioner name this identity was generated for.
    pub fn provisioner_name(&self) -> &str {
        Self::provisioner_name_of(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn format_carries_provisioner_name() {
        let id = Identity::generate("k8s.io/default");
        let parts: Vec<&str> = id.as_str().splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<u128>().unwrap() > 0);
        assert!(parts[1].parse::<u32>().unwrap() < RANDOM_RANGE);
        assert_eq!(parts[2], "k8s.io/default");
        assert_eq!(id.provisioner_name(), "k8s.io/default");
    }

    #[test]
    fn provisioner_name_may_contain_dashes() {
        let id = Identity::generate("csi-memory-driver");
        assert_eq!(id.provisioner_name(), "csi-memory-driver");
    }

    #[test]
    fn foreign_tags() {
        assert_eq!(
            Identity::provisioner_name_of("1712345678901-42-other.io/foo"),
            Some("other.io/foo")
        );
        assert_eq!(Identity::provisioner_name_of("hand-written"), None);
        assert_eq!(Identity::provisioner_name_of("123-45-"), None);
        assert_eq!(Identity::provisioner_name_of(""), None);
    }

    #[test]
    fn identities_generated_back_to_back_differ() {
        // Pairs are generated within the same millisecond almost always, so
        // only the random component separates them: a collision per pair has
        // probability 1/10000.
        const PAIRS: usize = 2_000;
        let collisions = (0..PAIRS)
            .filter(|_| Identity::generate("p") == Identity::generate("p"))
            .count();
        assert!(collisions <= 5, "{collisions} collisions in {PAIRS} pairs");

        let distinct: HashSet<Identity> = (0..100).map(|_| Identity::generate("p")).collect();
        assert!(distinct.len() >= 95);
    }
}
