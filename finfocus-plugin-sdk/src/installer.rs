//! # Release Installer
//!
//! Fetches plugin release assets from a release index and installs them
//! under the registry's `<root>/<name>/<version>/<binary>` layout.
//!
//! Asset selection is platform-aware: an asset is compatible when its
//! `os`/`arch` match the host. When the requested version has no compatible
//! asset the behavior depends on the fallback policy:
//!
//! - [`FallbackPolicy::FallbackToLatest`] walks the release list newest
//!   first (bounded by the scan limit) and accepts the newest **stable**
//!   release that carries a compatible asset.
//! - [`FallbackPolicy::NoFallback`] fails. This is the default, matching
//!   non-interactive contexts where nobody can approve the substitution.
//!
//! The outcome records `was_fallback` and the originally requested version
//! whenever a different version ends up installed. Downloads land via
//! write-to-temp-then-rename so a torn download never looks installed.

use crate::error::PluginError;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// How many releases (newest first) the fallback scan may inspect.
pub const FALLBACK_SCAN_LIMIT: usize = 10;

/// One downloadable artifact of a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// File name the asset installs as
    pub name: String,
    /// Target operating system, e.g. `linux`
    pub os: String,
    /// Target architecture, e.g. `x86_64`
    pub arch: String,
    /// Download URL
    pub url: String,
}

/// One release in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// Release version
    pub version: Version,
    /// Whether this is a pre-release; fallback never selects these
    #[serde(default)]
    pub prerelease: bool,
    /// Platform artifacts
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// The release index document served per plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseIndex {
    /// Plugin name the index describes
    pub name: String,
    /// Releases, any order; the installer sorts newest first
    #[serde(default)]
    pub releases: Vec<Release>,
}

/// What to do when the requested version has no compatible asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Accept the newest stable release with a compatible asset
    FallbackToLatest,
    /// Fail on a missing asset (non-interactive default)
    #[default]
    NoFallback,
}

/// Result of a successful install.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Plugin name
    pub name: String,
    /// Version actually installed
    pub version: Version,
    /// Path to the installed binary
    pub binary: PathBuf,
    /// Whether a different version than requested was installed
    pub was_fallback: bool,
    /// The originally requested version, carried when `was_fallback`
    pub requested_version: Option<String>,
}

/// Downloads release assets and installs them under the plugin root.
#[derive(Debug, Clone)]
pub struct Installer {
    http: reqwest::Client,
    index_base_url: String,
    plugins_root: PathBuf,
    scan_limit: usize,
    os: String,
    arch: String,
}

impl Installer {
    /// Installer against a release index base URL; the index for a plugin
    /// is expected at `<base>/<name>/index.json`.
    pub fn new(index_base_url: impl Into<String>, plugins_root: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            index_base_url: index_base_url.into().trim_end_matches('/').to_string(),
            plugins_root: plugins_root.into(),
            scan_limit: FALLBACK_SCAN_LIMIT,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Override the fallback scan bound.
    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    /// Override the platform used for asset matching. Intended for tests.
    pub fn with_platform(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    /// Install `name` at `requested`, applying the fallback policy when the
    /// requested version has no compatible asset.
    pub async fn install(
        &self,
        name: &str,
        requested: &Version,
        policy: FallbackPolicy,
    ) -> Result<InstallOutcome, PluginError> {
        let index = self.fetch_index(name).await?;
        let mut releases = index.releases;
        releases.sort_by(|a, b| b.version.cmp(&a.version));

        let (release, asset, was_fallback) = self.select(name, &releases, requested, policy)?;
        if was_fallback {
            info!(
                plugin = name,
                requested = %requested,
                installed = %release.version,
                "requested version has no compatible asset, falling back"
            );
        }

        let binary = self.download(name, &release.version, asset).await?;
        Ok(InstallOutcome {
            name: name.to_string(),
            version: release.version.clone(),
            binary,
            was_fallback,
            requested_version: was_fallback.then(|| requested.to_string()),
        })
    }

    async fn fetch_index(&self, name: &str) -> Result<ReleaseIndex, PluginError> {
        let url = format!("{}/{}/index.json", self.index_base_url, name);
        debug!(%url, "fetching release index");
        let index = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<ReleaseIndex>()
            .await?;
        Ok(index)
    }

    fn compatible<'a>(&self, release: &'a Release) -> Option<&'a ReleaseAsset> {
        release
            .assets
            .iter()
            .find(|asset| asset.os == self.os && asset.arch == self.arch)
    }

    fn select<'a>(
        &self,
        name: &str,
        releases: &'a [Release],
        requested: &Version,
        policy: FallbackPolicy,
    ) -> Result<(&'a Release, &'a ReleaseAsset, bool), PluginError> {
        if let Some(release) = releases.iter().find(|r| &r.version == requested) {
            if let Some(asset) = self.compatible(release) {
                return Ok((release, asset, false));
            }
        } else {
            warn!(plugin = name, requested = %requested, "requested version absent from release index");
        }

        match policy {
            FallbackPolicy::NoFallback => Err(PluginError::NoCompatibleAsset {
                name: name.to_string(),
                os: self.os.clone(),
                arch: self.arch.clone(),
            }),
            FallbackPolicy::FallbackToLatest => releases
                .iter()
                .take(self.scan_limit)
                .filter(|release| !release.prerelease)
                .find_map(|release| {
                    self.compatible(release)
                        .map(|asset| (release, asset, &release.version != requested))
                })
                .ok_or_else(|| PluginError::NoCompatibleAsset {
                    name: name.to_string(),
                    os: self.os.clone(),
                    arch: self.arch.clone(),
                }),
        }
    }

    async fn download(
        &self,
        name: &str,
        version: &Version,
        asset: &ReleaseAsset,
    ) -> Result<PathBuf, PluginError> {
        let target_dir = self.plugins_root.join(name).join(version.to_string());
        std::fs::create_dir_all(&target_dir)?;
        let target = target_dir.join(&asset.name);

        debug!(url = %asset.url, target = %target.display(), "downloading release asset");
        let bytes = self
            .http
            .get(&asset.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let mut temp = tempfile::NamedTempFile::new_in(&target_dir)?;
        temp.write_all(&bytes)?;
        temp.flush()?;
        temp.persist(&target).map_err(|err| PluginError::Io(err.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&target)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&target, perms)?;
        }

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn asset(name: &str, os: &str, arch: &str, url: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            os: os.to_string(),
            arch: arch.to_string(),
            url: url.to_string(),
        }
    }

    fn release(version: &str, prerelease: bool, assets: Vec<ReleaseAsset>) -> Release {
        Release {
            version: Version::parse(version).unwrap(),
            prerelease,
            assets,
        }
    }

    fn test_installer(server_url: &str, root: &std::path::Path) -> Installer {
        Installer::new(server_url, root).with_platform("linux", "x86_64")
    }

    async fn mount_index(server: &MockServer, name: &str, index: &ReleaseIndex) {
        Mock::given(method("GET"))
            .and(path(format!("/{name}/index.json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(index))
            .mount(server)
            .await;
    }

    async fn mount_asset(server: &MockServer, asset_path: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(asset_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn installs_the_requested_version() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let index = ReleaseIndex {
            name: "aws".into(),
            releases: vec![release(
                "1.2.0",
                false,
                vec![asset(
                    "finfocus-plugin-aws",
                    "linux",
                    "x86_64",
                    &format!("{}/assets/aws-1.2.0", server.uri()),
                )],
            )],
        };
        mount_index(&server, "aws", &index).await;
        mount_asset(&server, "/assets/aws-1.2.0", b"binary-bytes").await;

        let installer = test_installer(&server.uri(), dir.path());
        let outcome = assert_ok!(
            installer
                .install("aws", &Version::parse("1.2.0").unwrap(), FallbackPolicy::NoFallback)
                .await
        );

        assert_eq!(outcome.version, Version::parse("1.2.0").unwrap());
        assert!(!outcome.was_fallback);
        assert!(outcome.requested_version.is_none());
        assert_eq!(std::fs::read(&outcome.binary).unwrap(), b"binary-bytes");
        assert!(outcome
            .binary
            .ends_with("aws/1.2.0/finfocus-plugin-aws"));
    }

    #[tokio::test]
    async fn missing_asset_without_fallback_fails() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let index = ReleaseIndex {
            name: "aws".into(),
            releases: vec![release(
                "1.2.0",
                false,
                vec![asset("finfocus-plugin-aws", "darwin", "aarch64", "unused")],
            )],
        };
        mount_index(&server, "aws", &index).await;

        let installer = test_installer(&server.uri(), dir.path());
        let err = assert_err!(
            installer
                .install("aws", &Version::parse("1.2.0").unwrap(), FallbackPolicy::NoFallback)
                .await
        );
        assert!(matches!(err, PluginError::NoCompatibleAsset { .. }));
    }

    #[tokio::test]
    async fn fallback_picks_newest_stable_with_compatible_asset() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let index = ReleaseIndex {
            name: "aws".into(),
            releases: vec![
                // Requested version: darwin-only.
                release(
                    "2.0.0",
                    false,
                    vec![asset("finfocus-plugin-aws", "darwin", "aarch64", "unused")],
                ),
                // Newer prerelease with a compatible asset must be skipped.
                release(
                    "2.1.0-rc.1",
                    true,
                    vec![asset(
                        "finfocus-plugin-aws",
                        "linux",
                        "x86_64",
                        &format!("{}/assets/aws-2.1.0-rc.1", server.uri()),
                    )],
                ),
                release(
                    "1.9.0",
                    false,
                    vec![asset(
                        "finfocus-plugin-aws",
                        "linux",
                        "x86_64",
                        &format!("{}/assets/aws-1.9.0", server.uri()),
                    )],
                ),
            ],
        };
        mount_index(&server, "aws", &index).await;
        mount_asset(&server, "/assets/aws-1.9.0", b"one-nine").await;

        let installer = test_installer(&server.uri(), dir.path());
        let outcome = installer
            .install("aws", &Version::parse("2.0.0").unwrap(), FallbackPolicy::FallbackToLatest)
            .await
            .unwrap();

        assert_eq!(outcome.version, Version::parse("1.9.0").unwrap());
        assert!(outcome.was_fallback);
        assert_eq!(outcome.requested_version.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn fallback_scan_is_bounded() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        // Ten incompatible releases ahead of one compatible release: with a
        // scan limit of 10 the compatible one is out of reach.
        let mut releases: Vec<Release> = (0..10)
            .map(|patch| {
                release(
                    &format!("3.0.{patch}"),
                    false,
                    vec![asset("finfocus-plugin-aws", "darwin", "aarch64", "unused")],
                )
            })
            .collect();
        releases.push(release(
            "2.0.0",
            false,
            vec![asset("finfocus-plugin-aws", "linux", "x86_64", "unused")],
        ));
        let index = ReleaseIndex { name: "aws".into(), releases };
        mount_index(&server, "aws", &index).await;

        let installer = test_installer(&server.uri(), dir.path());
        let err = installer
            .install("aws", &Version::parse("3.0.9").unwrap(), FallbackPolicy::FallbackToLatest)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NoCompatibleAsset { .. }));
    }
}
