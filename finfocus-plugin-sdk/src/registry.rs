//! # Plugin Registry
//!
//! Discovers plugin binaries installed on disk and resolves which version
//! to launch. The on-disk layout is `<root>/<name>/<version>/<binary>`,
//! where `<version>` is a semver directory. Version directories that do not
//! parse as semver are skipped with a warning rather than failing the scan.
//!
//! The plugin root resolves from an explicit override, then
//! `$FINFOCUS_HOME/plugins`, then `~/.finfocus/plugins`.

use crate::error::PluginError;
use crate::home;
use crate::launcher::LaunchOptions;
use semver::Version;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One installed plugin version found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    /// Plugin name (the first-level directory)
    pub name: String,
    /// Parsed version (the second-level directory)
    pub version: Version,
    /// Path to the launchable binary
    pub binary: PathBuf,
}

/// Disk-backed registry of installed plugins.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    root: PathBuf,
}

impl PluginRegistry {
    /// Registry over an explicit plugin root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Registry over the default plugin root: the override when given,
    /// otherwise `<home>/plugins` from the resolved FinFocus home.
    pub fn resolve(root_override: Option<PathBuf>) -> Result<Self, PluginError> {
        if let Some(root) = root_override {
            return Ok(Self::new(root));
        }
        let home_dir = home::resolve_home_dir().ok_or_else(|| {
            PluginError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "cannot resolve a home directory for the plugin root",
            ))
        })?;
        Ok(Self::new(home::plugins_dir(&home_dir)))
    }

    /// The plugin root this registry scans.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every installed plugin version, sorted by name then descending version.
    pub fn list(&self) -> Result<Vec<InstalledPlugin>, PluginError> {
        let mut installed = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(installed),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            for version_entry in std::fs::read_dir(entry.path())? {
                let version_entry = version_entry?;
                if !version_entry.file_type()?.is_dir() {
                    continue;
                }
                let version_str = version_entry.file_name().to_string_lossy().into_owned();
                let version = match Version::parse(&version_str) {
                    Ok(version) => version,
                    Err(err) => {
                        warn!(
                            plugin = %name,
                            dir = %version_str,
                            error = %err,
                            "skipping non-semver version directory"
                        );
                        continue;
                    }
                };
                match find_binary(&version_entry.path(), &name)? {
                    Some(binary) => installed.push(InstalledPlugin {
                        name: name.clone(),
                        version,
                        binary,
                    }),
                    None => {
                        warn!(plugin = %name, version = %version, "version directory has no binary");
                    }
                }
            }
        }

        installed.sort_by(|a, b| a.name.cmp(&b.name).then(b.version.cmp(&a.version)));
        Ok(installed)
    }

    /// Resolve the version to launch for a named plugin.
    ///
    /// Picks the greatest installed semver unless `pin` names a specific
    /// version, in which case exactly that version must be installed.
    pub fn resolve_version(&self, name: &str, pin: Option<&Version>) -> Result<InstalledPlugin, PluginError> {
        let mut versions: Vec<InstalledPlugin> = self
            .list()?
            .into_iter()
            .filter(|plugin| plugin.name == name)
            .collect();
        if versions.is_empty() {
            return Err(PluginError::NotInstalled { name: name.to_string() });
        }
        match pin {
            Some(pin) => versions
                .into_iter()
                .find(|plugin| &plugin.version == pin)
                .ok_or_else(|| PluginError::InvalidVersion {
                    version: pin.to_string(),
                    message: format!("version not installed for plugin {name}"),
                }),
            None => {
                versions.sort_by(|a, b| b.version.cmp(&a.version));
                debug!(plugin = %name, version = %versions[0].version, "resolved greatest installed version");
                Ok(versions.remove(0))
            }
        }
    }

    /// Launch parameters for a resolved plugin.
    pub fn launch_options(&self, plugin: &InstalledPlugin, home_dir: impl Into<PathBuf>) -> LaunchOptions {
        LaunchOptions::new(plugin.binary.clone(), home_dir)
    }
}

/// Find the launchable binary inside one version directory: a file named
/// `finfocus-plugin-<name>` when present, otherwise the first regular file.
fn find_binary(dir: &Path, name: &str) -> Result<Option<PathBuf>, PluginError> {
    let preferred = format!("finfocus-plugin-{name}");
    let mut first: Option<PathBuf> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with(&preferred) {
            return Ok(Some(path));
        }
        first.get_or_insert(path);
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(root: &Path, name: &str, version: &str, binary: &str) {
        let dir = root.join(name).join(version);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(binary), b"#!/bin/sh\n").unwrap();
    }

    #[test]
    fn empty_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::new(dir.path().join("plugins"));
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn greatest_semver_wins_without_a_pin() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "aws", "0.9.0", "finfocus-plugin-aws");
        install(dir.path(), "aws", "0.10.2", "finfocus-plugin-aws");
        install(dir.path(), "aws", "0.10.0", "finfocus-plugin-aws");

        let registry = PluginRegistry::new(dir.path());
        let resolved = registry.resolve_version("aws", None).unwrap();
        assert_eq!(resolved.version, Version::new(0, 10, 2));
    }

    #[test]
    fn pinned_version_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "aws", "1.0.0", "finfocus-plugin-aws");

        let registry = PluginRegistry::new(dir.path());
        let pin = Version::new(1, 0, 0);
        assert_eq!(
            registry.resolve_version("aws", Some(&pin)).unwrap().version,
            pin
        );

        let missing = Version::new(2, 0, 0);
        let err = registry.resolve_version("aws", Some(&missing)).unwrap_err();
        assert!(matches!(err, PluginError::InvalidVersion { .. }));
    }

    #[test]
    fn non_semver_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "aws", "latest", "finfocus-plugin-aws");
        install(dir.path(), "aws", "1.2.3", "finfocus-plugin-aws");

        let registry = PluginRegistry::new(dir.path());
        let listed = registry.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, Version::new(1, 2, 3));
    }

    #[test]
    fn unknown_plugin_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::new(dir.path());
        let err = registry.resolve_version("gcp", None).unwrap_err();
        assert!(matches!(err, PluginError::NotInstalled { .. }));
    }

    #[test]
    fn preferred_binary_name_beats_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("aws").join("1.0.0");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("README.md"), b"docs").unwrap();
        std::fs::write(version_dir.join("finfocus-plugin-aws"), b"bin").unwrap();

        let registry = PluginRegistry::new(dir.path());
        let resolved = registry.resolve_version("aws", None).unwrap();
        assert!(resolved.binary.ends_with("finfocus-plugin-aws"));
    }
}
