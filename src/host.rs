// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host system access.
//!
//! Everything the reconciler learns about the host, or changes on it, goes
//! through the [`Host`] trait. The live implementation is [`SystemHost`],
//! which talks to the file system directly and shells out to the usual
//! system utilities (findmnt, blkid, btrfs, swapon, etc.).
//!
//! # Probes and Mutations
//!
//! Host operations fall into two camps. Probes only inspect state, and
//! report absence through `false` or `None` instead of an error, e.g.,
//! [`Host::exists`] or [`Host::probe`]. Mutations change state, and any
//! failure they hit is returned to the caller as a [`HostError`].

use std::{
    ffi::OsStr,
    fs::{self, OpenOptions, Permissions},
    os::unix::fs::{FileTypeExt, PermissionsExt},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

/// Layer of indirection for host system access.
pub trait Host {
    /// Check if current process runs with root-equivalent privileges.
    fn is_privileged(&self) -> bool;

    /// Read entire file into a string.
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write string to file, replacing its contents.
    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    /// Check if path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Check if path is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Check if path itself is a symbolic link.
    fn is_symlink(&self, path: &Path) -> bool;

    /// Check if path names a block device node.
    fn is_block_device(&self, path: &Path) -> bool;

    /// Resolve path to its canonical form, following every symbolic link.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// Size of regular file in bytes, or `None` if it does not exist.
    fn file_size(&self, path: &Path) -> Option<u64>;

    /// Create directory along with any missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Remove empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Remove file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Create file, or truncate it to zero length if it already exists.
    fn truncate(&self, path: &Path) -> Result<()>;

    /// Set permission bits of path.
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;

    /// List paths matching a glob pattern in sorted order.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;

    /// Create fresh, empty directory to use as a scratch mount point.
    fn scratch_dir(&self) -> Result<PathBuf>;

    /// Check if program can be found on `PATH`.
    fn has_program(&self, name: &str) -> bool;

    /// Run command to completion, and return its trimmed standard output.
    ///
    /// # Errors
    ///
    /// - Return [`HostError::Command`] if the command exits unsuccessfully.
    fn run(
        &self,
        program: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<String>;

    /// Run informational command, treating any failure as absence.
    fn probe(
        &self,
        program: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Option<String> {
        match self.run(program, args) {
            Ok(output) => Some(output),
            Err(error) => {
                debug!("probe {program} came back empty: {error}");
                None
            }
        }
    }
}

/// Direct access to the live host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl SystemHost {
    /// Construct new live host handle.
    pub fn new() -> Self {
        Self
    }
}

impl Host for SystemHost {
    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|err| HostError::io("read", path, err))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents.as_bytes()).map_err(|err| HostError::io("write", path, err))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_symlink(&self, path: &Path) -> bool {
        path.is_symlink()
    }

    fn is_block_device(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| meta.file_type().is_block_device())
            .unwrap_or(false)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).map_err(|err| HostError::io("resolve", path, err))
    }

    fn file_size(&self, path: &Path) -> Option<u64> {
        fs::metadata(path)
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|err| HostError::io("create directory", path, err))
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).map_err(|err| HostError::io("remove directory", path, err))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|err| HostError::io("remove", path, err))
    }

    fn truncate(&self, path: &Path) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map(drop)
            .map_err(|err| HostError::io("truncate", path, err))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(|err| HostError::io("set permissions of", path, err))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let mut paths = glob::glob(pattern)?
            .filter_map(|entry| entry.ok())
            .collect::<Vec<_>>();
        paths.sort();

        Ok(paths)
    }

    fn scratch_dir(&self) -> Result<PathBuf> {
        // INVARIANT: Caller owns removal, so do not let tempfile delete it.
        tempfile::Builder::new()
            .prefix("btrfs-hibernate.")
            .tempdir()
            .map(|dir| dir.keep())
            .map_err(|err| HostError::io("create scratch directory in", &std::env::temp_dir(), err))
    }

    fn has_program(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }

    #[instrument(skip(self, args), level = "debug")]
    fn run(
        &self,
        program: &str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<String> {
        syscall_non_interactive(program, args)
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect::<Vec<_>>();
    let command_line = render_command_line(cmd.as_ref(), &args);
    debug!("run {command_line}");

    let output = Command::new(cmd.as_ref())
        .args(&args)
        .output()
        .map_err(|err| HostError::Spawn {
            source: err,
            command: command_line.clone(),
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        let mut message = String::new();
        if !stdout.trim().is_empty() {
            message.push_str(format!("stdout: {}\n", stdout.trim()).as_str());
        }

        if !stderr.trim().is_empty() {
            message.push_str(format!("stderr: {}\n", stderr.trim()).as_str());
        }

        // INVARIANT: Chomp trailing newlines.
        let message = message.trim_end().to_string();

        return Err(HostError::Command {
            command: command_line,
            status: output.status.code(),
            message,
        });
    }

    Ok(stdout.trim().to_string())
}

/// Render program and arguments as one printable command line.
pub fn render_command_line(cmd: &OsStr, args: &[impl AsRef<OsStr>]) -> String {
    let mut line = cmd.to_string_lossy().into_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg.as_ref().to_string_lossy().as_ref());
    }

    line
}

/// Host access error types.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// File system operation fails.
    #[error("failed to {action} {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        action: &'static str,
        path: PathBuf,
    },

    /// Command cannot be started at all.
    #[error("failed to run {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Command exits unsuccessfully.
    #[error("command {command:?} failed with status {status:?}:\n{message}")]
    Command {
        command: String,
        status: Option<i32>,
        message: String,
    },

    /// Glob pattern is malformed.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

impl HostError {
    pub(crate) fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            source,
            action,
            path: path.to_path_buf(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = HostError> = std::result::Result<T, E>;
