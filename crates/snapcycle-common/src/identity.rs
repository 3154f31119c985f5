//! Volume identity: the (namespace, name) pair addressing a claim

use std::fmt;

/// Uniquely addresses a PersistentVolumeClaim within the cluster.
///
/// Used as the backup-registry key. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VolumeIdentity {
    /// Namespace of the claim
    pub namespace: String,
    /// Name of the claim
    pub name: String,
}

impl VolumeIdentity {
    /// Create an identity from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for VolumeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_display_is_namespace_slash_name() {
        let id = VolumeIdentity::new("default", "data");
        assert_eq!(id.to_string(), "default/data");
    }

    #[test]
    fn test_identity_is_a_usable_map_key() {
        let mut map = HashMap::new();
        map.insert(VolumeIdentity::new("default", "data"), 1);

        // Same pair resolves to the same entry
        assert_eq!(map.get(&VolumeIdentity::new("default", "data")), Some(&1));

        // Same name in a different namespace is a different volume
        assert_eq!(map.get(&VolumeIdentity::new("prod", "data")), None);
    }
}
