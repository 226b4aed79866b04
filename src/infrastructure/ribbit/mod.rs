//! Ribbit - mod installer
//!
//! Mods are published as `lilypad-mod-<id>` packages. Ribbit fetches them
//! through an external package manager into its packages directory and
//! links each one into the user mod directory, where the loader finds it.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::application::errors::InstallError;

pub const DEFAULT_PACKAGE_PREFIX: &str = "lilypad-mod-";

/// A package found by a search
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// External package manager that does the actual fetching
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Packages whose name matches `query`
    async fn search(&self, query: &str) -> Result<Vec<PackageInfo>, InstallError>;

    /// Install `package` under `<prefix>/node_modules`
    async fn fetch(&self, package: &str, prefix: &Path) -> Result<(), InstallError>;

    async fn remove(&self, package: &str, prefix: &Path) -> Result<(), InstallError>;
}

/// npm-compatible package manager driven as a subprocess
pub struct NpmPackageManager {
    command: String,
}

impl NpmPackageManager {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, InstallError> {
        debug!("Running {} {}", self.command, args.join(" "));
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .await
            .map_err(|e| InstallError::PackageManager(format!("failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InstallError::PackageManager(format!(
                "{} {} exited with {}: {}",
                self.command,
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NpmPackageManager {
    fn default() -> Self {
        Self::new("npm")
    }
}

#[async_trait]
impl PackageManager for NpmPackageManager {
    async fn search(&self, query: &str) -> Result<Vec<PackageInfo>, InstallError> {
        let stdout = self.run(&["search", "--json", query]).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| InstallError::PackageManager(format!("unreadable search results: {}", e)))
    }

    async fn fetch(&self, package: &str, prefix: &Path) -> Result<(), InstallError> {
        let prefix = prefix.to_string_lossy();
        self.run(&["install", "--no-save", "--prefix", &prefix, package])
            .await
            .map(|_| ())
    }

    async fn remove(&self, package: &str, prefix: &Path) -> Result<(), InstallError> {
        let prefix = prefix.to_string_lossy();
        self.run(&["uninstall", "--no-save", "--prefix", &prefix, package])
            .await
            .map(|_| ())
    }
}

/// Installer for user mods
pub struct Ribbit {
    packages_dir: PathBuf,
    user_dir: PathBuf,
    package_prefix: String,
    manager: Arc<dyn PackageManager>,
}

impl Ribbit {
    pub fn new(
        packages_dir: impl Into<PathBuf>,
        user_dir: impl Into<PathBuf>,
        manager: Arc<dyn PackageManager>,
    ) -> Self {
        Self {
            packages_dir: packages_dir.into(),
            user_dir: user_dir.into(),
            package_prefix: DEFAULT_PACKAGE_PREFIX.to_string(),
            manager,
        }
    }

    pub fn with_package_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.package_prefix = prefix.into();
        self
    }

    pub fn package_name(&self, mod_id: &str) -> String {
        format!("{}{}", self.package_prefix, mod_id)
    }

    /// Mod id for a package name, if it carries the mod prefix
    pub fn mod_id_of<'a>(&self, package: &'a str) -> Option<&'a str> {
        package
            .strip_prefix(self.package_prefix.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Search for installable mods. Results without the mod prefix are
    /// dropped.
    pub async fn search(&self, term: Option<&str>) -> Result<Vec<PackageInfo>, InstallError> {
        let query = format!("{}{}", self.package_prefix, term.unwrap_or("").trim());
        let mut results: Vec<PackageInfo> = self
            .manager
            .search(&query)
            .await?
            .into_iter()
            .filter(|p| self.mod_id_of(&p.name).is_some())
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    /// Fetch and link a mod. Returns the linked mod directory.
    pub async fn install(&self, mod_id: &str) -> Result<PathBuf, InstallError> {
        validate_id(mod_id)?;
        let link = self.user_dir.join(mod_id);
        if tokio::fs::symlink_metadata(&link).await.is_ok() {
            return Err(InstallError::AlreadyInstalled(mod_id.to_string()));
        }

        let package = self.package_name(mod_id);
        tokio::fs::create_dir_all(&self.packages_dir).await?;
        self.manager.fetch(&package, &self.packages_dir).await?;

        let package_dir = self.packages_dir.join("node_modules").join(&package);
        if !package_dir.is_dir() {
            return Err(InstallError::PackageManager(format!(
                "{} was not installed to {}",
                package,
                package_dir.display()
            )));
        }

        tokio::fs::create_dir_all(&self.user_dir).await?;
        let package_dir = tokio::fs::canonicalize(&package_dir).await?;
        link_dir(&package_dir, &link).await?;

        info!("Installed mod {} from {}", mod_id, package);
        Ok(link)
    }

    /// Unlink and remove a mod that Ribbit installed
    /// Fail unless `mod_id` is a link ribbit created into the packages dir.
    /// Returns the link path.
    pub async fn check_managed(&self, mod_id: &str) -> Result<PathBuf, InstallError> {
        validate_id(mod_id)?;
        let link = self.user_dir.join(mod_id);
        let meta = match tokio::fs::symlink_metadata(&link).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InstallError::NotInstalled(mod_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.file_type().is_symlink() {
            return Err(InstallError::NotManaged(mod_id.to_string()));
        }

        let managed = match (
            tokio::fs::canonicalize(&link).await,
            tokio::fs::canonicalize(&self.packages_dir).await,
        ) {
            (Ok(target), Ok(packages)) => target.starts_with(packages),
            _ => false,
        };
        if !managed {
            return Err(InstallError::NotManaged(mod_id.to_string()));
        }
        Ok(link)
    }

    pub async fn uninstall(&self, mod_id: &str) -> Result<(), InstallError> {
        let link = self.check_managed(mod_id).await?;
        tokio::fs::remove_file(&link).await?;
        self.manager
            .remove(&self.package_name(mod_id), &self.packages_dir)
            .await?;

        info!("Uninstalled mod {}", mod_id);
        Ok(())
    }
}

fn validate_id(mod_id: &str) -> Result<(), InstallError> {
    let valid = !mod_id.is_empty()
        && !mod_id.starts_with(['.', '-'])
        && mod_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(InstallError::InvalidId(mod_id.to_string()))
    }
}

#[cfg(unix)]
async fn link_dir(original: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(original, link).await
}

#[cfg(windows)]
async fn link_dir(original: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_dir(original, link).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Package manager that lays out packages on disk without a network
    #[derive(Default)]
    struct FakeManager {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PackageManager for FakeManager {
        async fn search(&self, query: &str) -> Result<Vec<PackageInfo>, InstallError> {
            self.calls.lock().unwrap().push(format!("search {}", query));
            Ok(["lilypad-mod-dice", "lilypad-mod-weather", "lilypad-core", "lilypad-mod-"]
                .iter()
                .map(|name| PackageInfo {
                    name: name.to_string(),
                    version: Some("1.0.0".into()),
                    description: None,
                })
                .collect())
        }

        async fn fetch(&self, package: &str, prefix: &Path) -> Result<(), InstallError> {
            self.calls.lock().unwrap().push(format!("fetch {}", package));
            if package.ends_with("missing") {
                return Err(InstallError::PackageManager("404 Not Found".into()));
            }
            let dir = prefix.join("node_modules").join(package);
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join("package.json"), r#"{"version": "1.0.0"}"#)?;
            Ok(())
        }

        async fn remove(&self, package: &str, prefix: &Path) -> Result<(), InstallError> {
            self.calls.lock().unwrap().push(format!("remove {}", package));
            std::fs::remove_dir_all(prefix.join("node_modules").join(package))?;
            Ok(())
        }
    }

    fn fixture() -> (tempfile::TempDir, Arc<FakeManager>, Ribbit) {
        let root = tempfile::tempdir().unwrap();
        let manager = Arc::new(FakeManager::default());
        let ribbit = Ribbit::new(
            root.path().join("packages"),
            root.path().join("mods").join("user"),
            manager.clone(),
        );
        (root, manager, ribbit)
    }

    #[tokio::test]
    async fn test_search_keeps_prefixed_packages() {
        let (_root, manager, ribbit) = fixture();
        let results = ribbit.search(Some("d")).await.unwrap();
        let names: Vec<&str> = results.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["lilypad-mod-dice", "lilypad-mod-weather"]);
        assert_eq!(manager.calls.lock().unwrap()[0], "search lilypad-mod-d");
    }

    #[tokio::test]
    async fn test_rejects_bad_ids() {
        let (_root, _manager, ribbit) = fixture();
        assert!(matches!(ribbit.install("../evil").await, Err(InstallError::InvalidId(_))));
        assert!(matches!(ribbit.uninstall("").await, Err(InstallError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_no_link() {
        let (root, _manager, ribbit) = fixture();
        assert!(matches!(
            ribbit.install("missing").await,
            Err(InstallError::PackageManager(_))
        ));
        assert!(!root.path().join("mods/user/missing").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_then_uninstall() {
        let (root, manager, ribbit) = fixture();
        let link = ribbit.install("dice").await.unwrap();
        assert!(link.join("package.json").is_file());
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());

        assert!(matches!(
            ribbit.install("dice").await,
            Err(InstallError::AlreadyInstalled(_))
        ));

        assert_eq!(ribbit.check_managed("dice").await.unwrap(), link);
        ribbit.uninstall("dice").await.unwrap();
        assert!(std::fs::symlink_metadata(&link).is_err());
        assert!(!root.path().join("packages/node_modules/lilypad-mod-dice").exists());
        assert_eq!(
            manager.calls.lock().unwrap().last().map(String::as_str),
            Some("remove lilypad-mod-dice")
        );

        assert!(matches!(
            ribbit.uninstall("dice").await,
            Err(InstallError::NotInstalled(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refuses_unmanaged_mods() {
        let (root, _manager, ribbit) = fixture();
        let user = root.path().join("mods/user");

        // Hand-installed directory
        std::fs::create_dir_all(user.join("local")).unwrap();
        assert!(matches!(
            ribbit.uninstall("local").await,
            Err(InstallError::NotManaged(_))
        ));
        assert!(matches!(
            ribbit.check_managed("local").await,
            Err(InstallError::NotManaged(_))
        ));
        assert!(user.join("local").is_dir());

        // Symlink pointing outside the packages dir
        let elsewhere = root.path().join("elsewhere");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::create_dir_all(root.path().join("packages")).unwrap();
        std::os::unix::fs::symlink(&elsewhere, user.join("linked")).unwrap();
        assert!(matches!(
            ribbit.uninstall("linked").await,
            Err(InstallError::NotManaged(_))
        ));
        assert!(elsewhere.is_dir());
    }
}
