// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Root block device resolution.
//!
//! The mount source that findmnt reports for `/` is not always a usable
//! device path. On btrfs it carries a subvolume annotation, e.g.,
//! `/dev/nvme0n1p2[/@]`, and on encrypted or LVM setups it may be a
//! device-mapper name, or a symbolic link into `/dev/disk/by-*` that points
//! at an anonymous `dm-N` node. Resolution classifies the source by shape
//! first, then lets each shape resolve itself.

use crate::host::Host;

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

const MAPPER_DIR: &str = "/dev/mapper";
const LUKS_PREFIX: &str = "/dev/mapper/luks-";

/// Strip trailing btrfs subvolume annotation from a mount source.
pub fn strip_subvolume_annotation(source: &str) -> &str {
    let source = source.trim();
    match source.find('[') {
        Some(index) if source.ends_with(']') => &source[..index],
        _ => source,
    }
}

/// Shape of the mount source backing the root file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// LUKS device-mapper path.
    Luks(PathBuf),

    /// Any other device-mapper path, e.g., LVM.
    Mapper(PathBuf),

    /// Symbolic link to some device node.
    Symlink(PathBuf),

    /// Direct block device path.
    Direct(PathBuf),
}

impl MountSource {
    /// Classify mount source by shape.
    ///
    /// Subvolume annotations are stripped beforehand.
    pub fn classify(source: &str, host: &impl Host) -> Self {
        let source = strip_subvolume_annotation(source);
        let path = PathBuf::from(source);

        if source.starts_with(LUKS_PREFIX) {
            Self::Luks(path)
        } else if path.starts_with(MAPPER_DIR) {
            Self::Mapper(path)
        } else if host.is_symlink(&path) {
            Self::Symlink(path)
        } else {
            Self::Direct(path)
        }
    }

    /// Path as it appeared in the mount source.
    pub fn as_path(&self) -> &Path {
        match self {
            Self::Luks(path) | Self::Mapper(path) | Self::Symlink(path) | Self::Direct(path) => {
                path.as_path()
            }
        }
    }

    /// Resolve mount source into a device path.
    ///
    /// Only symbolic links need real work. A link to an anonymous `dm-N`
    /// node is turned back into its friendly `/dev/mapper/<name>` path when
    /// device-mapper knows the name. Otherwise the link target is used.
    ///
    /// # Errors
    ///
    /// - Return [`DeviceError::Resolve`] if a symbolic link cannot be
    ///   followed.
    pub fn resolve(&self, host: &impl Host) -> Result<PathBuf> {
        match self {
            Self::Luks(path) | Self::Mapper(path) | Self::Direct(path) => Ok(path.clone()),
            Self::Symlink(path) => {
                let target = host
                    .canonicalize(path)
                    .map_err(|err| DeviceError::Resolve {
                        source: err,
                        device: path.clone(),
                    })?;
                debug!("{} links to {}", path.display(), target.display());

                if !is_anonymous_mapper_node(&target) {
                    return Ok(target);
                }

                match mapper_name(&target, host) {
                    Some(name) => Ok(Path::new(MAPPER_DIR).join(name)),
                    None => Ok(target),
                }
            }
        }
    }
}

fn is_anonymous_mapper_node(path: &Path) -> bool {
    path.parent() == Some(Path::new("/dev"))
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("dm-"))
            .is_some_and(|minor| !minor.is_empty() && minor.bytes().all(|b| b.is_ascii_digit()))
}

fn mapper_name(node: &Path, host: &impl Host) -> Option<String> {
    host.probe(
        "dmsetup",
        [
            OsStr::new("info"),
            OsStr::new("-c"),
            OsStr::new("--noheadings"),
            OsStr::new("-o"),
            OsStr::new("name"),
            node.as_os_str(),
        ],
    )
    .map(|name| name.trim().to_string())
    .filter(|name| !name.is_empty())
}

/// Resolve mount source of `/` into an existing block device.
///
/// # Errors
///
/// - Return [`DeviceError::Resolve`] if a symbolic link cannot be followed.
/// - Return [`DeviceError::NotFound`] if the resolved path is not a block
///   device node.
#[instrument(skip(host), level = "debug")]
pub fn resolve_root_device(source: &str, host: &impl Host) -> Result<PathBuf> {
    let classified = MountSource::classify(source, host);
    debug!("classified root mount source as {classified:?}");
    let device = classified.resolve(host)?;

    if !host.is_block_device(&device) {
        return Err(DeviceError::NotFound {
            original: source.to_string(),
            resolved: device,
        });
    }

    Ok(device)
}

/// Root device resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Symbolic link cannot be followed.
    #[error("failed to resolve {:?}", device.display())]
    Resolve {
        #[source]
        source: crate::host::HostError,
        device: PathBuf,
    },

    /// Resolved path is not an existing block device.
    #[error("cannot find root device: mount source {original:?} resolved to {:?}, which is not a block device", resolved.display())]
    NotFound { original: String, resolved: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("/dev/nvme0n1p2[/@]", "/dev/nvme0n1p2"; "subvolume path")]
    #[test_case("/dev/sda2[/@root/.snapshots/1]", "/dev/sda2"; "nested subvolume")]
    #[test_case("/dev/sda2", "/dev/sda2"; "no annotation")]
    #[test_case("/dev/mapper/luks-1234[/@]\n", "/dev/mapper/luks-1234"; "trailing newline")]
    #[test]
    fn strip_annotation(input: &str, expect: &str) {
        assert_eq!(strip_subvolume_annotation(input), expect);
    }

    #[test_case("/dev/dm-3", true; "dm node")]
    #[test_case("/dev/dm-", false; "missing minor")]
    #[test_case("/dev/dm-x1", false; "non numeric minor")]
    #[test_case("/dev/mapper/dm-3", false; "not under dev")]
    #[test_case("/dev/sda2", false; "disk partition")]
    #[test]
    fn anonymous_mapper_nodes(input: &str, expect: bool) {
        assert_eq!(is_anonymous_mapper_node(Path::new(input)), expect);
    }
}
