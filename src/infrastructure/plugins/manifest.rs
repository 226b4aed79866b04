//! Package metadata read from a mod's `package.json`

use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the package metadata next to a mod's code
pub const PACKAGE_FILE: &str = "package.json";

/// Author field, either a bare string or an object with a name
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PackageAuthor {
    Name(String),
    Person { name: String },
}

impl PackageAuthor {
    pub fn name(&self) -> &str {
        match self {
            PackageAuthor::Name(name) => name,
            PackageAuthor::Person { name } => name,
        }
    }
}

/// Mod package metadata
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PackageMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<PackageAuthor>,
    /// Native library file, relative to the mod directory
    pub main: Option<String>,
}

impl PackageMetadata {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().map(PackageAuthor::name)
    }

    /// Best-effort read of `<dir>/package.json`. Missing or malformed
    /// metadata is `None`, never an error.
    pub async fn from_dir(dir: impl AsRef<Path>) -> Option<Self> {
        let path = dir.as_ref().join(PACKAGE_FILE);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_forms() {
        let plain: PackageMetadata =
            serde_json::from_str(r#"{"name": "dice", "author": "kermit"}"#).unwrap();
        assert_eq!(plain.author_name(), Some("kermit"));

        let person: PackageMetadata =
            serde_json::from_str(r#"{"author": {"name": "piggy", "email": "p@x"}}"#).unwrap();
        assert_eq!(person.author_name(), Some("piggy"));
    }

    #[tokio::test]
    async fn test_missing_or_broken_metadata_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PackageMetadata::from_dir(dir.path()).await.is_none());

        std::fs::write(dir.path().join(PACKAGE_FILE), "{ not json").unwrap();
        assert!(PackageMetadata::from_dir(dir.path()).await.is_none());
    }
}
