//! The static id-tag → display-name table the CSMS authorizes against.
//!
//! Read-only within a run, loaded once at CSMS construction.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AuthorizedTags {
    table: HashMap<String, String>,
}

impl AuthorizedTags {
    /// The fixture table used across scenario runs. Three entries, matching
    /// the source simulator's default fleet of registered RFID cards.
    pub fn default_fixture() -> Self {
        let mut table = HashMap::new();
        table.insert("DRIVER_ALPHA".to_string(), "Alpha Driver".to_string());
        table.insert("DRIVER_BRAVO".to_string(), "Bravo Driver".to_string());
        table.insert("TEST123".to_string(), "Test User".to_string());
        Self { table }
    }

    pub fn is_valid(&self, id_tag: &str) -> bool {
        self.table.contains_key(id_tag)
    }

    pub fn display_name(&self, id_tag: &str) -> Option<&str> {
        self.table.get(id_tag).map(|s| s.as_str())
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(|s| s.as_str())
    }
}

impl Default for AuthorizedTags {
    fn default() -> Self {
        Self::default_fixture()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tag_is_valid() {
        let tags = AuthorizedTags::default_fixture();
        assert!(tags.is_valid("DRIVER_ALPHA"));
        assert!(tags.is_valid("TEST123"));
    }

    #[test]
    fn unknown_tag_is_invalid() {
        let tags = AuthorizedTags::default_fixture();
        assert!(!tags.is_valid("NOT_A_REAL_TAG"));
    }
}
