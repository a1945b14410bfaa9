// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hibernation reconciliation.
//!
//! The reconciler compares the host against the state it needs for
//! hibernation to work, and changes only what is missing:
//!
//! 1. Check privileges, and that `/` lives on btrfs.
//! 2. Resolve the block device backing `/`.
//! 3. Create the swap subvolume.
//! 4. Mount the swap subvolume, and record it in the mount table.
//! 5. Create the swapfile, or recreate it if it is too small or unformatted.
//! 6. Look up the resume offset of the swapfile.
//! 7. Activate the swapfile, and record it in the mount table.
//! 8. Add resume parameters to the bootloader's kernel command line.
//! 9. Add the resume hook to the initramfs, and rebuild it.
//!
//! Steps run strictly in order, and every step first looks before it
//! touches anything. Running the reconciler twice leaves the host exactly as
//! the first run left it. Nothing is rolled back: a failing step stops the
//! run, and whatever earlier steps changed stays changed.

use crate::{
    boot::{BootEntryEdit, Bootloader, GrubDefaultEdit, ResumeParams},
    config::Layout,
    device::resolve_root_device,
    fstab::{FstabEdit, FstabEntry},
    host::Host,
    initramfs::{HookStatus, HooksEdit, Initramfs},
    size::{parse_meminfo, SwapSize},
    swapfile::{parse_resume_offset, SwapfilePlan},
};

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

const MEMINFO: &str = "/proc/meminfo";
const SWAPFILE_MODE: u32 = 0o600;

/// Hibernation reconciler.
///
/// Drives the host toward a working swapfile-based hibernation setup on a
/// btrfs root file system.
#[derive(Debug)]
pub struct Reconciler<H>
where
    H: Host,
{
    host: H,
    layout: Layout,
}

impl<H> Reconciler<H>
where
    H: Host,
{
    /// Construct new reconciler.
    pub fn new(host: H, layout: Layout) -> Self {
        Self { host, layout }
    }

    /// Host being reconciled.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Layout being reconciled against.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Reconcile host for hibernation.
    ///
    /// Uses physical memory plus 2 GiB as swap size if none is given.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::NotPrivileged`] if not running as root.
    /// - Return [`ReconcileError::NotBtrfs`] if `/` is not on btrfs.
    /// - Return [`ReconcileError::Device`] if the root device cannot be
    ///   resolved.
    /// - Return [`ReconcileError::Host`] if any mutating command fails.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self, size: Option<SwapSize>) -> Result<Report> {
        self.check_preconditions()?;

        let swap_size = match size {
            Some(size) => size,
            None => self.default_swap_size()?,
        };
        let required = swap_size.bytes()?;
        info!("target swap size is {swap_size} ({required} bytes)");

        let device = self.detect_device()?;
        let uuid = self.filesystem_uuid(&device)?;
        let subvolume_created = self.reconcile_subvolume(&device)?;
        let (subvolume_mounted, subvolume_entry) = self.reconcile_mount_point(&device, &uuid)?;
        let swapfile = self.reconcile_swapfile(required)?;
        let resume = ResumeParams::new(uuid, self.resume_offset()?);
        info!("resume parameters are {resume}");
        let (swap_activated, swap_entry) = self.reconcile_activation()?;
        let boot = self.reconcile_bootloader(&resume)?;
        let initramfs = self.reconcile_initramfs()?;

        Ok(Report {
            swap_size,
            device,
            resume,
            subvolume_created,
            subvolume_mounted,
            fstab_entries_added: usize::from(subvolume_entry) + usize::from(swap_entry),
            swapfile,
            swap_activated,
            boot,
            initramfs,
        })
    }

    /// Check privileges and root file system type.
    ///
    /// Performs no mutation whatsoever.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::NotPrivileged`] if not running as root.
    /// - Return [`ReconcileError::NotBtrfs`] if `/` is not on btrfs.
    #[instrument(skip(self), level = "debug")]
    pub fn check_preconditions(&self) -> Result<()> {
        if !self.host.is_privileged() {
            return Err(ReconcileError::NotPrivileged);
        }

        let fstype = self.host.run("findmnt", ["-no", "FSTYPE", "/"])?;
        let fstype = fstype.trim();
        if fstype != "btrfs" {
            return Err(ReconcileError::NotBtrfs {
                found: fstype.to_string(),
            });
        }
        debug!("root file system is btrfs");

        Ok(())
    }

    /// Default swap size: physical memory plus 2 GiB.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Host`] if memory information is unreadable.
    /// - Return [`ReconcileError::Size`] if memory information is malformed.
    pub fn default_swap_size(&self) -> Result<SwapSize> {
        let meminfo = self.host.read_to_string(Path::new(MEMINFO))?;
        let size = SwapSize::default_for_memory(parse_meminfo(&meminfo)?);
        debug!("no swap size given, defaulting to {size}");

        Ok(size)
    }

    #[instrument(skip(self), level = "debug")]
    fn detect_device(&self) -> Result<PathBuf> {
        let source = self.host.run("findmnt", ["-no", "SOURCE", "/"])?;
        let device = resolve_root_device(&source, &self.host)?;
        info!("root device is {}", device.display());

        Ok(device)
    }

    #[instrument(skip(self), level = "debug")]
    fn filesystem_uuid(&self, device: &Path) -> Result<String> {
        let uuid = self.host.run(
            "blkid",
            [
                OsStr::new("-s"),
                OsStr::new("UUID"),
                OsStr::new("-o"),
                OsStr::new("value"),
                device.as_os_str(),
            ],
        )?;

        let uuid = uuid.trim();
        if uuid.is_empty() {
            return Err(ReconcileError::NoUuid {
                device: device.to_path_buf(),
            });
        }

        Ok(uuid.to_string())
    }

    #[instrument(skip(self), level = "debug")]
    fn reconcile_subvolume(&self, device: &Path) -> Result<bool> {
        let scratch = ScratchMount::new(&self.host, device)?;
        let subvolume = scratch.path().join(&self.layout.swap.subvolume);

        let exists = self
            .host
            .probe(
                "btrfs",
                [
                    OsStr::new("subvolume"),
                    OsStr::new("show"),
                    subvolume.as_os_str(),
                ],
            )
            .is_some();
        if exists {
            info!("subvolume {} already exists", self.layout.swap.subvolume);
            return Ok(false);
        }

        info!("create subvolume {}", self.layout.swap.subvolume);
        self.host.run(
            "btrfs",
            [
                OsStr::new("subvolume"),
                OsStr::new("create"),
                subvolume.as_os_str(),
            ],
        )?;

        Ok(true)
    }

    #[instrument(skip(self), level = "debug")]
    fn reconcile_mount_point(&self, device: &Path, uuid: &str) -> Result<(bool, bool)> {
        let mount_point = &self.layout.swap.mount_point;
        if !self.host.is_dir(mount_point) {
            info!("create mount point {}", mount_point.display());
            self.host.create_dir_all(mount_point)?;
        }

        let entry = FstabEntry::subvolume(uuid, mount_point, &self.layout.swap.subvolume);
        let entry_added = self.ensure_fstab_entry(&entry)?;

        let mounted = self
            .host
            .probe("mountpoint", [OsStr::new("-q"), mount_point.as_os_str()])
            .is_some();
        if mounted {
            info!("{} already mounted", mount_point.display());
            return Ok((false, entry_added));
        }

        info!(
            "mount subvolume {} at {}",
            self.layout.swap.subvolume,
            mount_point.display()
        );
        self.host.run(
            "mount",
            [
                OsStr::new("-o"),
                OsStr::new(&format!("subvol={}", self.layout.swap.subvolume)),
                device.as_os_str(),
                mount_point.as_os_str(),
            ],
        )?;

        Ok((true, entry_added))
    }

    #[instrument(skip(self), level = "debug")]
    fn reconcile_swapfile(&self, required: u64) -> Result<SwapfilePlan> {
        let swapfile = self.layout.swapfile();
        let current = self.host.file_size(&swapfile);
        let formatted = current.is_some() && self.has_swap_signature(&swapfile);
        let plan = SwapfilePlan::new(current, formatted, required);

        match plan {
            SwapfilePlan::Keep => {
                info!("swapfile {} is large enough", swapfile.display());
                return Ok(plan);
            }
            SwapfilePlan::Recreate { current } => {
                if formatted {
                    warn!(
                        "swapfile {} holds {current} bytes, but {required} are needed, recreating it",
                        swapfile.display()
                    );
                } else {
                    warn!(
                        "swapfile {} has no swap signature, recreating it",
                        swapfile.display()
                    );
                }
                if self
                    .host
                    .probe("swapoff", [swapfile.as_os_str()])
                    .is_none()
                {
                    debug!("swapfile {} was not active", swapfile.display());
                }
                self.host.remove_file(&swapfile)?;
                warn!("resume offset moves with the new swapfile, update stale resume_offset parameters by hand");
            }
            SwapfilePlan::Create => {}
        }

        info!("create swapfile {} ({required} bytes)", swapfile.display());

        // INVARIANT: Disable copy-on-write while the file has no extents.
        self.host.truncate(&swapfile)?;
        self.host
            .run("chattr", [OsStr::new("+C"), swapfile.as_os_str()])?;
        self.host.run(
            "fallocate",
            [
                OsStr::new("-l"),
                OsStr::new(&required.to_string()),
                swapfile.as_os_str(),
            ],
        )?;
        self.host.set_mode(&swapfile, SWAPFILE_MODE)?;
        self.host.run("mkswap", [swapfile.as_os_str()])?;

        Ok(plan)
    }

    #[instrument(skip(self), level = "debug")]
    fn resume_offset(&self) -> Result<u64> {
        let swapfile = self.layout.swapfile();
        let output = self.host.run(
            "btrfs",
            [
                OsStr::new("inspect-internal"),
                OsStr::new("map-swapfile"),
                OsStr::new("-r"),
                swapfile.as_os_str(),
            ],
        )?;

        parse_resume_offset(&output).ok_or(ReconcileError::ResumeOffset { swapfile })
    }

    fn has_swap_signature(&self, swapfile: &Path) -> bool {
        self.host
            .probe(
                "blkid",
                [
                    OsStr::new("-p"),
                    OsStr::new("-s"),
                    OsStr::new("TYPE"),
                    OsStr::new("-o"),
                    OsStr::new("value"),
                    swapfile.as_os_str(),
                ],
            )
            .is_some_and(|kind| kind.trim() == "swap")
    }

    #[instrument(skip(self), level = "debug")]
    fn reconcile_activation(&self) -> Result<(bool, bool)> {
        let swapfile = self.layout.swapfile();
        let active = self
            .host
            .probe("swapon", ["--show=NAME", "--noheadings"])
            .is_some_and(|listing| {
                listing
                    .lines()
                    .any(|name| Path::new(name.trim()) == swapfile.as_path())
            });

        let activated = if active {
            info!("swapfile {} already active", swapfile.display());
            false
        } else {
            info!("activate swapfile {}", swapfile.display());
            self.host.run("swapon", [swapfile.as_os_str()])?;
            true
        };

        let entry_added = self.ensure_fstab_entry(&FstabEntry::swapfile(&swapfile))?;

        Ok((activated, entry_added))
    }

    #[instrument(skip(self, params), level = "debug")]
    fn reconcile_bootloader(&self, params: &ResumeParams) -> Result<BootOutcome> {
        let paths = &self.layout.paths;
        let bootloader = Bootloader::detect(paths, &self.host);
        let mut outcome = BootOutcome {
            bootloader,
            entries_edited: 0,
            regenerated: false,
        };

        match bootloader {
            Bootloader::SystemdBoot => {
                let pattern = paths.systemd_boot_entries.join("*.conf");
                let entries = self.host.glob(pattern.to_string_lossy().as_ref())?;
                if entries.is_empty() {
                    warn!(
                        "no systemd-boot entries found in {}",
                        paths.systemd_boot_entries.display()
                    );
                }

                for entry in entries {
                    let mut editor = BootEntryEdit::from(self.host.read_to_string(&entry)?.as_str());
                    editor.ensure_params(params);
                    if !editor.is_changed() {
                        debug!("boot entry {} already has resume", entry.display());
                        continue;
                    }

                    info!("add resume parameters to boot entry {}", entry.display());
                    self.host.write(&entry, editor.to_string().as_str())?;
                    outcome.entries_edited += 1;
                }
            }
            Bootloader::Grub => {
                let mut editor =
                    GrubDefaultEdit::from(self.host.read_to_string(&paths.grub_default)?.as_str());
                editor.ensure_params(params);
                if !editor.is_changed() {
                    info!("{} already has resume", paths.grub_default.display());
                    return Ok(outcome);
                }

                info!(
                    "add resume parameters to {}",
                    paths.grub_default.display()
                );
                self.host
                    .write(&paths.grub_default, editor.to_string().as_str())?;
                outcome.entries_edited = 1;

                info!("regenerate {}", paths.grub_config.display());
                self.host.run(
                    "grub-mkconfig",
                    [OsStr::new("-o"), paths.grub_config.as_os_str()],
                )?;
                outcome.regenerated = true;
            }
            Bootloader::Unknown => {
                warn!("unknown bootloader, add \"{params}\" to the kernel command line by hand");
            }
        }

        Ok(outcome)
    }

    #[instrument(skip(self), level = "debug")]
    fn reconcile_initramfs(&self) -> Result<InitramfsOutcome> {
        let paths = &self.layout.paths;
        let generator = Initramfs::detect(paths, &self.host);
        let mut outcome = InitramfsOutcome {
            generator,
            hook: None,
            regenerated: false,
        };

        match generator {
            Initramfs::Mkinitcpio => {
                let config = &paths.mkinitcpio_config;
                let mut editor = HooksEdit::from(self.host.read_to_string(config)?.as_str());
                let status = editor.ensure_resume();
                outcome.hook = Some(status);

                match status {
                    HookStatus::Added => {
                        info!("add resume hook to {}", config.display());
                        self.host.write(config, editor.to_string().as_str())?;
                        info!("regenerate initramfs images");
                        self.host.run("mkinitcpio", ["-P"])?;
                        outcome.regenerated = true;
                    }
                    HookStatus::Present => info!("{} already has resume hook", config.display()),
                    HookStatus::Systemd => {
                        info!("{} uses systemd hook, which resumes on its own", config.display())
                    }
                    HookStatus::NoHooks => {
                        warn!("{} has no HOOKS, add resume hook by hand", config.display())
                    }
                }
            }
            Initramfs::Dracut => {
                info!("regenerate initramfs images with dracut");
                self.host
                    .run("dracut", ["--force", "--regenerate-all"])?;
                outcome.regenerated = true;
            }
            Initramfs::Unknown => {
                warn!("unknown initramfs generator, make sure it includes resume support");
            }
        }

        Ok(outcome)
    }

    fn ensure_fstab_entry(&self, entry: &FstabEntry) -> Result<bool> {
        let fstab = &self.layout.paths.fstab;
        let mut editor = FstabEdit::from(self.host.read_to_string(fstab)?.as_str());
        if !editor.ensure_entry(entry) {
            debug!("{} already has {:?}", fstab.display(), entry.markers());
            return Ok(false);
        }

        info!("add \"{}\" to {}", entry.line(), fstab.display());
        self.host.write(fstab, editor.to_string().as_str())?;

        Ok(true)
    }
}

/// Top-level btrfs subvolume mounted on a scratch directory.
///
/// Unmounts and removes the scratch directory when dropped, no matter how
/// the work done under it went.
#[derive(Debug)]
pub struct ScratchMount<'h, H>
where
    H: Host,
{
    host: &'h H,
    path: PathBuf,
}

impl<'h, H> ScratchMount<'h, H>
where
    H: Host,
{
    /// Mount top-level subvolume (id 5) of device on fresh scratch directory.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Host`] if the scratch directory cannot be
    ///   created, or the device cannot be mounted. The scratch directory is
    ///   removed again in the latter case.
    pub fn new(host: &'h H, device: &Path) -> Result<Self> {
        let path = host.scratch_dir()?;
        debug!(
            "mount top-level subvolume of {} at {}",
            device.display(),
            path.display()
        );

        let mounted = host.run(
            "mount",
            [
                OsStr::new("-o"),
                OsStr::new("subvolid=5"),
                device.as_os_str(),
                path.as_os_str(),
            ],
        );
        if let Err(error) = mounted {
            if let Err(cleanup) = host.remove_dir(&path) {
                warn!("{cleanup}");
            }
            return Err(error.into());
        }

        Ok(Self { host, path })
    }

    /// Directory the top-level subvolume is mounted on.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl<H> Drop for ScratchMount<'_, H>
where
    H: Host,
{
    fn drop(&mut self) {
        debug!("unmount scratch directory {}", self.path.display());
        if let Err(error) = self.host.run("umount", [self.path.as_os_str()]) {
            warn!("{error}");
            return;
        }

        if let Err(error) = self.host.remove_dir(&self.path) {
            warn!("{error}");
        }
    }
}

/// What the bootloader step found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOutcome {
    /// Bootloader found on the host.
    pub bootloader: Bootloader,

    /// Number of configuration files that gained resume parameters.
    pub entries_edited: usize,

    /// Whether the bootloader configuration was regenerated.
    pub regenerated: bool,
}

/// What the initramfs step found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitramfsOutcome {
    /// Initramfs generator found on the host.
    pub generator: Initramfs,

    /// State of the resume hook, for generators that list hooks.
    pub hook: Option<HookStatus>,

    /// Whether initramfs images were regenerated.
    pub regenerated: bool,
}

/// Summary of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Swap size reconciled against.
    pub swap_size: SwapSize,

    /// Resolved root block device.
    pub device: PathBuf,

    /// Kernel parameters needed to resume.
    pub resume: ResumeParams,

    /// Whether the swap subvolume was created.
    pub subvolume_created: bool,

    /// Whether the swap subvolume was mounted.
    pub subvolume_mounted: bool,

    /// Number of lines added to the mount table.
    pub fstab_entries_added: usize,

    /// What happened to the swapfile.
    pub swapfile: SwapfilePlan,

    /// Whether the swapfile was activated.
    pub swap_activated: bool,

    /// Bootloader step outcome.
    pub boot: BootOutcome,

    /// Initramfs step outcome.
    pub initramfs: InitramfsOutcome,
}

impl Report {
    /// Check if the run changed any persistent host configuration.
    ///
    /// Dracut rebuilds its images on every run, so that rebuild alone does
    /// not count as a change.
    pub fn changed_configuration(&self) -> bool {
        self.subvolume_created
            || self.fstab_entries_added > 0
            || self.swapfile != SwapfilePlan::Keep
            || self.boot.entries_edited > 0
            || self.boot.regenerated
            || self.initramfs.hook == Some(HookStatus::Added)
    }
}

/// Reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Process lacks root privileges.
    #[error("must run as root")]
    NotPrivileged,

    /// Root file system is not btrfs.
    #[error("root file system must be btrfs, found {found:?}")]
    NotBtrfs { found: String },

    /// Root device has no file system UUID.
    #[error("cannot determine file system UUID of {:?}", device.display())]
    NoUuid { device: PathBuf },

    /// Extent layout of swapfile cannot be interpreted.
    #[error("cannot determine resume offset of {:?}", swapfile.display())]
    ResumeOffset { swapfile: PathBuf },

    /// Root device cannot be resolved.
    #[error(transparent)]
    Device(#[from] crate::device::DeviceError),

    /// Swap size is invalid.
    #[error(transparent)]
    Size(#[from] crate::size::SizeError),

    /// Host operation fails.
    #[error(transparent)]
    Host(#[from] crate::host::HostError),
}

/// Friendly result alias :3
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
