//! Release discovery against the platform's GitHub repository. Platform
//! releases are tagged by date (`2025.04.1`); tags starting with `v`
//! belong to the packaging scripts and are ignored.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;

use crate::download;
use crate::error::{Error, Result};
use crate::manifest::{ArtifactAsset, Asset, Manifest};
use crate::platform::PlatformInfo;

pub const RELEASES_URL: &str = "https://api.github.com/repos/rocq-prover/platform/releases";

/// File name markers identifying Intel builds among macOS images.
const INTEL_MARKERS: [&str; 3] = ["intel", "x86_64", "amd64"];

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Clone)]
pub struct ReleaseSummary {
    pub tag: String,
    /// Prover version stated in the release notes, when they state one.
    pub toolchain_version: Option<String>,
}

/// Lists recent platform releases, newest first.
pub async fn fetch_releases() -> Result<Vec<ReleaseSummary>> {
    let url = format!("{}?per_page=30", RELEASES_URL);
    let releases: Vec<GitHubRelease> = get_json(&url).await?;
    Ok(releases
        .into_iter()
        .filter(|release| is_platform_tag(&release.tag_name))
        .map(|release| ReleaseSummary {
            toolchain_version: infer_toolchain_version(&release.body),
            tag: release.tag_name,
        })
        .collect())
}

/// Builds a manifest for one release tag from its published artifacts.
/// Only the signed macOS and Windows artifacts are published on releases;
/// linux always builds from the package manager.
pub async fn manifest_for_tag(tag: &str, platform: &PlatformInfo) -> Result<Manifest> {
    if platform.os == "linux" {
        return Err(Error::Config(
            "releases carry no downloadable artifact for linux; use the embedded manifest"
                .to_string(),
        ));
    }

    let url = format!("{}/tags/{}", RELEASES_URL, tag);
    let release: GitHubRelease = get_json(&url).await?;
    let version = infer_toolchain_version(&release.body).ok_or_else(|| {
        Error::Config(format!(
            "release {} does not state a toolchain version",
            tag
        ))
    })?;
    let asset = select_signed_asset(&release.assets, platform).ok_or_else(|| {
        Error::Config(format!(
            "release {} has no signed artifact for {}/{}",
            tag, platform.os, platform.arch
        ))
    })?;
    Ok(synthesize(release.tag_name, version, platform, asset))
}

async fn get_json<T: serde::de::DeserializeOwned>(url: &str) -> Result<T> {
    let mut request = download::http_client()?
        .get(url)
        .header("Accept", "application/vnd.github.v3+json");
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        if !token.is_empty() {
            request = request.header("Authorization", format!("token {}", token));
        }
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(Error::Download(format!(
            "HTTP {} fetching {}",
            response.status().as_u16(),
            url
        )));
    }
    Ok(response.json::<T>().await?)
}

fn is_platform_tag(tag: &str) -> bool {
    !tag.is_empty() && !tag.starts_with('v')
}

/// Release notes open with a bold `**Rocq x.y.z**` (or `**Coq x.y.z**`
/// before the rebrand).
fn infer_toolchain_version(body: &str) -> Option<String> {
    let pattern = Regex::new(r"\*\*(?:Rocq|Coq)\s+(\d+\.\d+\.\d+)\*\*").ok()?;
    pattern.captures(body).map(|caps| caps[1].to_string())
}

fn select_signed_asset<'a>(
    assets: &'a [GitHubAsset],
    platform: &PlatformInfo,
) -> Option<&'a GitHubAsset> {
    match platform.os.as_str() {
        "macos" => {
            let images: Vec<&GitHubAsset> = assets
                .iter()
                .filter(|asset| is_signed(&asset.name, ".dmg"))
                .collect();
            let wants_intel = platform.arch == "x86_64";
            images
                .iter()
                .find(|asset| has_intel_marker(&asset.name) == wants_intel)
                .copied()
                .or_else(|| images.first().copied())
        }
        "windows" => assets.iter().find(|asset| is_signed(&asset.name, ".exe")),
        _ => None,
    }
}

fn is_signed(name: &str, extension: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("signed_") && lower.ends_with(extension)
}

fn has_intel_marker(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    INTEL_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn synthesize(
    tag: String,
    version: String,
    platform: &PlatformInfo,
    asset: &GitHubAsset,
) -> Manifest {
    let artifact = ArtifactAsset {
        url: asset.browser_download_url.clone(),
        sha256: String::new(),
    };
    let wrapped = match platform.os.as_str() {
        "windows" => Asset::SelfExtractingInstaller(artifact),
        _ => Asset::DiskImage(artifact),
    };
    let mut by_arch = HashMap::new();
    by_arch.insert(platform.arch.clone(), wrapped);
    let mut assets = HashMap::new();
    assets.insert(platform.os.clone(), by_arch);
    Manifest {
        channel: "stable".to_string(),
        toolchain_version: version,
        release_id: tag,
        assets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> GitHubAsset {
        GitHubAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.invalid/{}", name),
        }
    }

    fn platform(os: &str, arch: &str) -> PlatformInfo {
        PlatformInfo {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    #[test]
    fn packaging_tags_are_filtered_out() {
        assert!(is_platform_tag("2025.04.1"));
        assert!(is_platform_tag("2022.09.1"));
        assert!(!is_platform_tag("v0.9"));
        assert!(!is_platform_tag(""));
    }

    #[test]
    fn toolchain_version_comes_from_the_release_notes() {
        let body = "This release ships **Rocq 9.0.0** compiled with OCaml 4.14.2.";
        assert_eq!(infer_toolchain_version(body), Some("9.0.0".to_string()));

        let legacy = "The platform contains **Coq 8.19.2** and its ecosystem.";
        assert_eq!(infer_toolchain_version(legacy), Some("8.19.2".to_string()));

        assert_eq!(infer_toolchain_version("no version here"), None);
    }

    #[test]
    fn macos_arm_prefers_the_non_intel_image() {
        let assets = vec![
            asset("signed_Rocq-Platform-release-2025.04.1-intel.dmg"),
            asset("signed_Rocq-Platform-release-2025.04.1-arm.dmg"),
            asset("Rocq-Platform-unsigned.dmg"),
        ];
        let picked = select_signed_asset(&assets, &platform("macos", "arm64")).unwrap();
        assert_eq!(picked.name, "signed_Rocq-Platform-release-2025.04.1-arm.dmg");

        let intel = select_signed_asset(&assets, &platform("macos", "x86_64")).unwrap();
        assert_eq!(intel.name, "signed_Rocq-Platform-release-2025.04.1-intel.dmg");
    }

    #[test]
    fn windows_takes_the_signed_installer() {
        let assets = vec![
            asset("Rocq-Platform-release-2025.04.1.exe"),
            asset("signed_Rocq-Platform-release-2025.04.1.exe"),
        ];
        let picked = select_signed_asset(&assets, &platform("windows", "x86_64")).unwrap();
        assert_eq!(picked.name, "signed_Rocq-Platform-release-2025.04.1.exe");
        assert!(select_signed_asset(&assets, &platform("linux", "x86_64")).is_none());
    }

    #[tokio::test]
    async fn linux_releases_point_at_the_embedded_manifest() {
        let err = manifest_for_tag("2025.04.1", &platform("linux", "x86_64"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("embedded manifest"));
    }

    #[test]
    fn synthesized_manifests_carry_one_asset() {
        let release_asset = asset("signed_Rocq-Platform-release-2025.04.1.exe");
        let manifest = synthesize(
            "2025.04.1".to_string(),
            "9.0.0".to_string(),
            &platform("windows", "x86_64"),
            &release_asset,
        );
        assert_eq!(manifest.release_id, "2025.04.1");
        assert_eq!(manifest.toolchain_version, "9.0.0");
        let picked = manifest
            .asset_for(&platform("windows", "x86_64"))
            .unwrap();
        assert_eq!(picked.kind(), "self-extracting-installer");
        assert!(picked.artifact().unwrap().sha256.is_empty());
    }
}
