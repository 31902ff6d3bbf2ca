//! Core component image references.
//!
//! Images are `<repository>/<component><arch-suffix>:<tag>`. The suffix is
//! empty on amd64 and `-<arch>` elsewhere. etcd's tag follows the Kubernetes
//! minor version; other components are tagged with the Kubernetes version.

use semver::Version;
use thiserror::Error;
use tracing::warn;

/// etcd component name.
pub const ETCD: &str = "etcd";

/// Oldest supported Kubernetes minor version (1.x).
const MIN_KUBERNETES_MINOR: u64 = 10;

/// etcd used for Kubernetes versions newer than the table.
const NEWEST_ETCD: &str = "3.4.13-0";

/// etcd image tag per supported Kubernetes minor version (1.x).
const ETCD_VERSIONS: &[(u64, &str)] = &[
    (10, "3.1.12"),
    (11, "3.2.18"),
    (12, "3.2.24"),
    (13, "3.2.24"),
    (14, "3.3.10"),
    (15, "3.3.10"),
    (16, "3.3.15-0"),
    (17, "3.4.3-0"),
    (18, "3.4.3-0"),
    (19, "3.4.13-0"),
];

/// Errors resolving an image reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Invalid Kubernetes version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Kubernetes version {version} is not supported (minimum v1.{minimum})")]
    UnsupportedVersion { version: String, minimum: u64 },
}

/// Resolve the image for a core component.
///
/// A non-empty `override_image` is returned unchanged.
pub fn core_image(
    component: &str,
    repository: &str,
    kubernetes_version: &str,
    override_image: &str,
) -> Result<String, ImageError> {
    let override_image = override_image.trim();
    if !override_image.is_empty() {
        return Ok(override_image.to_string());
    }

    let version = parse_kubernetes_version(kubernetes_version)?;
    let tag = if component == ETCD {
        etcd_version_for(&version)?.to_string()
    } else {
        format!("v{}", version)
    };

    Ok(format!(
        "{}/{}{}:{}",
        repository.trim_end_matches('/'),
        component,
        image_arch_suffix(),
        tag
    ))
}

/// Parse a Kubernetes version, tolerating a leading `v` and a missing patch.
pub fn parse_kubernetes_version(version: &str) -> Result<Version, ImageError> {
    let trimmed = version.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let (core, rest) = match bare.find(['-', '+']) {
        Some(idx) => bare.split_at(idx),
        None => (bare, ""),
    };
    let normalized = match core.matches('.').count() {
        1 => format!("{}.0{}", core, rest),
        _ => bare.to_string(),
    };

    Version::parse(&normalized).map_err(|e| ImageError::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// etcd tag for a Kubernetes version.
///
/// Versions newer than the table get the newest known etcd.
pub fn etcd_version_for(version: &Version) -> Result<&'static str, ImageError> {
    if version.major != 1 || version.minor < MIN_KUBERNETES_MINOR {
        return Err(ImageError::UnsupportedVersion {
            version: version.to_string(),
            minimum: MIN_KUBERNETES_MINOR,
        });
    }

    match ETCD_VERSIONS.iter().find(|(minor, _)| *minor == version.minor) {
        Some((_, tag)) => Ok(*tag),
        None => {
            warn!(
                kubernetes_version = %version,
                etcd_version = NEWEST_ETCD,
                "Kubernetes version is newer than the known etcd table, using newest etcd"
            );
            Ok(NEWEST_ETCD)
        }
    }
}

/// Image name suffix for the running architecture.
pub fn image_arch_suffix() -> String {
    arch_suffix(std::env::consts::ARCH)
}

/// Image name suffix for a Rust target architecture name.
pub fn arch_suffix(arch: &str) -> String {
    match go_arch(arch) {
        "amd64" => String::new(),
        other => format!("-{}", other),
    }
}

fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    }
}
