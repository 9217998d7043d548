//! Service identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A bindable endpoint: service name plus an instance suffix.
///
/// Two live hosts sharing a name never share an instance suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub instance: String,
}

impl ServiceIdentity {
    pub fn new(name: &str, instance: &str) -> Self {
        Self {
            name: name.to_string(),
            instance: instance.to_string(),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let identity = ServiceIdentity::new("worker", "4_1");
        assert_eq!(identity.to_string(), "worker/4_1");
    }

    #[test]
    fn test_identities_differ_by_instance() {
        assert_ne!(ServiceIdentity::new("audio", "1"), ServiceIdentity::new("audio", "2"));
    }
}
