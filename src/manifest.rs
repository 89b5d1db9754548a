use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::PlatformInfo;

/// Default manifest shipped with the binary, used when the caller pins
/// neither a manifest file nor a release tag.
pub const EMBEDDED_MANIFEST: &str = include_str!("../manifests/latest.json");

/// Release descriptor pinning one platform release and the assets that
/// install it on each supported OS/architecture pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub channel: String,
    pub toolchain_version: String,
    pub release_id: String,
    /// OS name -> architecture -> asset.
    pub assets: HashMap<String, HashMap<String, Asset>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Asset {
    /// Signed `.dmg` whose application bundle is copied into place.
    #[serde(rename = "disk-image")]
    DiskImage(ArtifactAsset),
    /// Signed installer executable that runs elevated.
    #[serde(rename = "self-extracting-installer")]
    SelfExtractingInstaller(ArtifactAsset),
    /// Pinned package set built inside a dedicated opam switch.
    #[serde(rename = "source-package-manager")]
    SourcePackageManager(SwitchAsset),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactAsset {
    pub url: String,
    /// Hex digest of the artifact; empty means verification is skipped.
    #[serde(default)]
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchAsset {
    pub compiler: String,
    #[serde(default = "default_switch_prefix")]
    pub switch_prefix: String,
    pub repo_name: String,
    pub repo_url: String,
    pub packages: Vec<PackageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    /// Feature flag gating this package; omitted means always installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<String>,
}

fn default_switch_prefix() -> String {
    "CP".to_string()
}

impl Asset {
    pub fn kind(&self) -> &'static str {
        match self {
            Asset::DiskImage(_) => "disk-image",
            Asset::SelfExtractingInstaller(_) => "self-extracting-installer",
            Asset::SourcePackageManager(_) => "source-package-manager",
        }
    }

    /// The downloadable artifact, if this asset has one.
    pub fn artifact(&self) -> Option<&ArtifactAsset> {
        match self {
            Asset::DiskImage(artifact) | Asset::SelfExtractingInstaller(artifact) => Some(artifact),
            Asset::SourcePackageManager(_) => None,
        }
    }
}

impl Manifest {
    /// Parses manifest JSON and checks it carries a usable asset for
    /// `platform`.
    pub fn parse(data: &[u8], platform: &PlatformInfo) -> Result<Manifest> {
        let manifest: Manifest = serde_json::from_slice(data)
            .map_err(|err| Error::Config(format!("invalid manifest: {}", err)))?;
        manifest.asset_for(platform)?;
        Ok(manifest)
    }

    pub fn load(path: &Path, platform: &PlatformInfo) -> Result<Manifest> {
        let data = fs::read(path).map_err(|err| {
            Error::Config(format!("cannot read manifest {}: {}", path.display(), err))
        })?;
        Manifest::parse(&data, platform)
    }

    pub fn embedded(platform: &PlatformInfo) -> Result<Manifest> {
        Manifest::parse(EMBEDDED_MANIFEST.as_bytes(), platform)
    }

    pub fn asset_for(&self, platform: &PlatformInfo) -> Result<&Asset> {
        let asset = self
            .assets
            .get(&platform.os)
            .and_then(|by_arch| by_arch.get(&platform.arch))
            .ok_or_else(|| {
                Error::Config(format!(
                    "manifest has no asset for {}/{}",
                    platform.os, platform.arch
                ))
            })?;
        if let Some(artifact) = asset.artifact() {
            if artifact.url.is_empty() {
                return Err(Error::Config(format!(
                    "asset for {}/{} has an empty url",
                    platform.os, platform.arch
                )));
            }
        }
        if let Asset::SourcePackageManager(spec) = asset {
            if spec.packages.is_empty() {
                return Err(Error::Config(format!(
                    "asset for {}/{} lists no packages",
                    platform.os, platform.arch
                )));
            }
        }
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(os: &str, arch: &str) -> PlatformInfo {
        PlatformInfo {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    #[test]
    fn embedded_manifest_covers_all_platforms() {
        for (os, arch) in [
            ("linux", "x86_64"),
            ("linux", "arm64"),
            ("macos", "arm64"),
            ("macos", "x86_64"),
            ("windows", "x86_64"),
        ] {
            let manifest = Manifest::embedded(&platform(os, arch))
                .unwrap_or_else(|err| panic!("{}/{}: {}", os, arch, err));
            assert_eq!(manifest.channel, "stable");
            assert!(!manifest.toolchain_version.is_empty());
        }
    }

    #[test]
    fn embedded_asset_kinds_match_os() {
        let manifest = Manifest::embedded(&platform("linux", "x86_64")).unwrap();
        let linux = manifest.asset_for(&platform("linux", "x86_64")).unwrap();
        assert_eq!(linux.kind(), "source-package-manager");
        let macos = manifest.asset_for(&platform("macos", "arm64")).unwrap();
        assert_eq!(macos.kind(), "disk-image");
        let windows = manifest.asset_for(&platform("windows", "x86_64")).unwrap();
        assert_eq!(windows.kind(), "self-extracting-installer");
    }

    #[test]
    fn switch_prefix_defaults() {
        let json = r#"{
            "channel": "stable",
            "toolchain_version": "9.0.0",
            "release_id": "2025.04.1",
            "assets": {
                "linux": {
                    "x86_64": {
                        "type": "source-package-manager",
                        "compiler": "ocaml-base-compiler.4.14.2",
                        "repo_name": "rocq-released",
                        "repo_url": "https://rocq-prover.org/opam/released",
                        "packages": [{"name": "rocq-prover", "version": "9.0.0"}]
                    }
                }
            }
        }"#;
        let manifest = Manifest::parse(json.as_bytes(), &platform("linux", "x86_64")).unwrap();
        match manifest.asset_for(&platform("linux", "x86_64")).unwrap() {
            Asset::SourcePackageManager(spec) => assert_eq!(spec.switch_prefix, "CP"),
            other => panic!("unexpected asset {:?}", other),
        }
    }

    #[test]
    fn missing_platform_is_a_config_error() {
        let err = Manifest::embedded(&platform("windows", "arm64")).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {:?}", err);
        assert!(err.to_string().contains("windows/arm64"));
    }

    #[test]
    fn unknown_asset_type_is_a_config_error() {
        let json = r#"{
            "channel": "stable",
            "toolchain_version": "9.0.0",
            "release_id": "2025.04.1",
            "assets": {
                "linux": {"x86_64": {"type": "floppy-disk", "url": "x", "sha256": ""}}
            }
        }"#;
        let err = Manifest::parse(json.as_bytes(), &platform("linux", "x86_64")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = Manifest::parse(b"{not json", &platform("linux", "x86_64")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_url_is_a_config_error() {
        let json = r#"{
            "channel": "stable",
            "toolchain_version": "9.0.0",
            "release_id": "2025.04.1",
            "assets": {
                "macos": {"arm64": {"type": "disk-image", "url": "", "sha256": ""}}
            }
        }"#;
        let err = Manifest::parse(json.as_bytes(), &platform("macos", "arm64")).unwrap_err();
        assert!(err.to_string().contains("empty url"));
    }
}
