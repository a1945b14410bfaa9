// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bootloader kernel parameter handling.
//!
//! The kernel can only find hibernation data at early boot if it is told
//! where to look: the UUID of the file system holding the swapfile, and the
//! physical offset of the swapfile within it. Both travel on the kernel
//! command line as `resume=` and `resume_offset=`.
//!
//! # Supported Bootloaders
//!
//! - __systemd-boot__: every entry file under the entries directory carries
//!   its own `options` line, so each entry gets edited on its own.
//! - __GRUB__: the command line lives in the defaults file, and only reaches
//!   the bootloader once `grub-mkconfig` regenerates the real configuration.
//!
//! Anything else is reported as [`Bootloader::Unknown`], and left alone.
//!
//! Every editor treats the presence of `resume=` anywhere in its file as
//! "already configured", except on commented out lines of the GRUB defaults
//! file. That keeps reruns from stacking parameters, and keeps the
//! reconciler from fighting an operator who configured resume by hand.

use crate::{config::HostPaths, host::Host};

use std::fmt::{Display, Formatter, Result as FmtResult};

const RESUME_KEY: &str = "resume=";
const GRUB_CMDLINE_KEY: &str = "GRUB_CMDLINE_LINUX_DEFAULT=";

/// Bootloader found on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootloader {
    SystemdBoot,
    Grub,
    Unknown,
}

impl Bootloader {
    /// Detect bootloader through presence of its configuration.
    ///
    /// systemd-boot wins over GRUB when both are present.
    pub fn detect(paths: &HostPaths, host: &impl Host) -> Self {
        if host.is_dir(&paths.systemd_boot_entries) {
            Self::SystemdBoot
        } else if host.exists(&paths.grub_default) {
            Self::Grub
        } else {
            Self::Unknown
        }
    }
}

impl Display for Bootloader {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::SystemdBoot => fmt.write_str("systemd-boot"),
            Self::Grub => fmt.write_str("grub"),
            Self::Unknown => fmt.write_str("unknown"),
        }
    }
}

/// Kernel parameters needed to resume from the swapfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeParams {
    /// UUID of the file system holding the swapfile.
    pub uuid: String,

    /// Physical offset of the swapfile's first extent.
    pub offset: u64,
}

impl ResumeParams {
    /// Construct new resume parameters.
    pub fn new(uuid: impl Into<String>, offset: u64) -> Self {
        Self {
            uuid: uuid.into(),
            offset,
        }
    }
}

impl Display for ResumeParams {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "resume=UUID={} resume_offset={}", self.uuid, self.offset)
    }
}

/// Editor for a single systemd-boot entry file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootEntryEdit {
    lines: Vec<String>,
    changed: bool,
}

impl BootEntryEdit {
    /// Check if entry already carries a resume parameter.
    pub fn has_resume(&self) -> bool {
        self.lines.iter().any(|line| line.contains(RESUME_KEY))
    }

    /// Append resume parameters to the entry's options.
    ///
    /// Adds a fresh `options` line if the entry has none.
    pub fn ensure_params(&mut self, params: &ResumeParams) {
        if self.has_resume() {
            return;
        }

        let options = self.lines.iter_mut().find(|line| {
            let mut fields = line.split_whitespace();
            fields.next() == Some("options")
        });

        match options {
            Some(line) => {
                let trimmed = line.trim_end().len();
                line.truncate(trimmed);
                line.push(' ');
                line.push_str(params.to_string().as_str());
            }
            None => self.lines.push(format!("options {params}")),
        }

        self.changed = true;
    }

    /// Check if entry differs from what it was parsed from.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

impl Display for BootEntryEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            writeln!(fmt, "{line}")?;
        }

        Ok(())
    }
}

impl From<&str> for BootEntryEdit {
    fn from(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_owned).collect(),
            changed: false,
        }
    }
}

/// Editor for the GRUB defaults file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GrubDefaultEdit {
    lines: Vec<String>,
    changed: bool,
}

impl GrubDefaultEdit {
    /// Check if defaults file already mentions a resume parameter.
    ///
    /// Commented out lines do not count.
    pub fn has_resume(&self) -> bool {
        self.lines
            .iter()
            .filter(|line| !line.trim_start().starts_with('#'))
            .any(|line| line.contains(RESUME_KEY))
    }

    /// Append resume parameters to the default kernel command line.
    ///
    /// Keeps the quoting style of the existing assignment. Adds a fresh
    /// assignment if the file has none.
    pub fn ensure_params(&mut self, params: &ResumeParams) {
        if self.has_resume() {
            return;
        }

        let assignment = self
            .lines
            .iter_mut()
            .find(|line| line.trim_start().starts_with(GRUB_CMDLINE_KEY));

        match assignment {
            Some(line) => *line = append_to_assignment(line, params),
            None => self.lines.push(format!("{GRUB_CMDLINE_KEY}\"{params}\"")),
        }

        self.changed = true;
    }

    /// Check if defaults file differs from what it was parsed from.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

fn append_to_assignment(line: &str, params: &ResumeParams) -> String {
    let (key, value) = line.split_at(line.find('=').map_or(line.len(), |index| index + 1));

    // INVARIANT: Whatever trails the value, e.g., a comment, stays untouched.
    let (quote, inner, trailer) = match value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let body = &value[quote.len_utf8()..];
            match body.find(quote) {
                Some(end) => (quote, &body[..end], &body[end + quote.len_utf8()..]),
                None => (quote, body, ""),
            }
        }
        _ => {
            let end = value.find(char::is_whitespace).unwrap_or(value.len());
            ('"', &value[..end], &value[end..])
        }
    };

    let inner = inner.trim_end();
    let trailer = trailer.trim_end();
    if inner.is_empty() {
        format!("{key}{quote}{params}{quote}{trailer}")
    } else {
        format!("{key}{quote}{inner} {params}{quote}{trailer}")
    }
}

impl Display for GrubDefaultEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            writeln!(fmt, "{line}")?;
        }

        Ok(())
    }
}

impl From<&str> for GrubDefaultEdit {
    fn from(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_owned).collect(),
            changed: false,
        }
    }
}
