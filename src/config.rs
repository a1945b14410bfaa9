// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify where the reconciler puts the swap subvolume and swapfile, and
//! where it expects the host's configuration files to live. Every field has
//! a default matching a stock Arch or Fedora install, so the configuration
//! file is optional. File I/O is left to the caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/btrfs-hibernate.toml";

/// Reconciler layout.
///
/// # General Layout
///
/// A layout is composed of two basic parts: swap and paths. The swap
/// section names the resources the reconciler creates. The paths section
/// points at the host files the reconciler inspects and edits.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Layout {
    /// Swap resources to create.
    pub swap: SwapSettings,

    /// Host configuration files to reconcile.
    pub paths: HostPaths,
}

impl Layout {
    /// Absolute path to the swapfile.
    pub fn swapfile(&self) -> PathBuf {
        self.swap.mount_point.join(&self.swap.file_name)
    }
}

impl FromStr for Layout {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut layout: Layout = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        layout.swap.mount_point = expand(&layout.swap.mount_point)?;
        layout.paths.fstab = expand(&layout.paths.fstab)?;
        layout.paths.systemd_boot_entries = expand(&layout.paths.systemd_boot_entries)?;
        layout.paths.grub_default = expand(&layout.paths.grub_default)?;
        layout.paths.grub_config = expand(&layout.paths.grub_config)?;
        layout.paths.mkinitcpio_config = expand(&layout.paths.mkinitcpio_config)?;

        Ok(layout)
    }
}

impl Display for Layout {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Swap resource settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwapSettings {
    /// Name of btrfs subvolume holding the swapfile.
    pub subvolume: String,

    /// Directory the swap subvolume gets mounted on.
    pub mount_point: PathBuf,

    /// Name of swapfile inside the mount point.
    pub file_name: String,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            subvolume: "@swap".into(),
            mount_point: "/swap".into(),
            file_name: "swapfile".into(),
        }
    }
}

/// Locations of host configuration files.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostPaths {
    /// System mount table.
    pub fstab: PathBuf,

    /// Directory holding systemd-boot entries.
    pub systemd_boot_entries: PathBuf,

    /// GRUB defaults file.
    pub grub_default: PathBuf,

    /// Generated GRUB configuration.
    pub grub_config: PathBuf,

    /// Configuration of mkinitcpio.
    pub mkinitcpio_config: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            fstab: "/etc/fstab".into(),
            systemd_boot_entries: "/boot/loader/entries".into(),
            grub_default: "/etc/default/grub".into(),
            grub_config: "/boot/grub/grub.cfg".into(),
            mkinitcpio_config: "/etc/mkinitcpio.conf".into(),
        }
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
