// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Initramfs generator handling.
//!
//! Resuming from hibernation happens inside the initramfs, before the root
//! file system is mounted. With mkinitcpio the `resume` hook has to be listed
//! explicitly, right after `filesystems`. Dracut pulls in its resume module
//! on its own, so it only needs the image rebuilt.

use crate::{config::HostPaths, host::Host};

use std::fmt::{Display, Formatter, Result as FmtResult};

const HOOKS_KEY: &str = "HOOKS=";
const RESUME_HOOK: &str = "resume";
const ANCHOR_HOOK: &str = "filesystems";

/// The systemd hook performs resume without help.
const SYSTEMD_HOOK: &str = "systemd";

/// Initramfs generator found on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initramfs {
    Mkinitcpio,
    Dracut,
    Unknown,
}

impl Initramfs {
    /// Detect initramfs generator.
    ///
    /// mkinitcpio is recognized by its configuration file, dracut by its
    /// binary being on `PATH`.
    pub fn detect(paths: &HostPaths, host: &impl Host) -> Self {
        if host.exists(&paths.mkinitcpio_config) {
            Self::Mkinitcpio
        } else if host.has_program("dracut") {
            Self::Dracut
        } else {
            Self::Unknown
        }
    }
}

impl Display for Initramfs {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Mkinitcpio => fmt.write_str("mkinitcpio"),
            Self::Dracut => fmt.write_str("dracut"),
            Self::Unknown => fmt.write_str("unknown"),
        }
    }
}

/// Result of making sure the resume hook is listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    /// Hook was already listed.
    Present,

    /// Hook list uses systemd, which resumes on its own.
    Systemd,

    /// Hook was inserted.
    Added,

    /// Configuration has no hook list to edit.
    NoHooks,
}

/// Editor for the hook list of mkinitcpio's configuration.
///
/// # Invariant
///
/// - The resume hook is listed at most once.
/// - Lines other than the hook list are never touched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HooksEdit {
    lines: Vec<String>,
    changed: bool,
}

impl HooksEdit {
    /// Current hook list, if the configuration has one.
    pub fn hooks(&self) -> Option<Vec<String>> {
        self.hooks_line()
            .and_then(|index| HookList::parse(&self.lines[index]))
            .map(|list| list.hooks)
    }

    /// Make sure the resume hook is listed.
    ///
    /// Inserts the hook right after `filesystems`, or at the end if
    /// `filesystems` is missing.
    pub fn ensure_resume(&mut self) -> HookStatus {
        let Some(index) = self.hooks_line() else {
            return HookStatus::NoHooks;
        };
        let Some(mut list) = HookList::parse(&self.lines[index]) else {
            return HookStatus::NoHooks;
        };

        if list.contains(RESUME_HOOK) {
            return HookStatus::Present;
        }

        if list.contains(SYSTEMD_HOOK) {
            return HookStatus::Systemd;
        }

        let position = list
            .hooks
            .iter()
            .position(|hook| hook == ANCHOR_HOOK)
            .map_or(list.hooks.len(), |anchor| anchor + 1);
        list.hooks.insert(position, RESUME_HOOK.into());

        self.lines[index] = list.to_string();
        self.changed = true;

        HookStatus::Added
    }

    /// Check if configuration differs from what it was parsed from.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    fn hooks_line(&self) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.trim_start().starts_with(HOOKS_KEY))
    }
}

impl Display for HooksEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            writeln!(fmt, "{line}")?;
        }

        Ok(())
    }
}

impl From<&str> for HooksEdit {
    fn from(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_owned).collect(),
            changed: false,
        }
    }
}

/// Single `HOOKS=` assignment split into its parts.
///
/// Both the array form `HOOKS=(a b c)` and the older string form
/// `HOOKS="a b c"` are understood, and written back in the same form.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HookList {
    indent: String,
    open: char,
    close: char,
    hooks: Vec<String>,
    trailer: String,
}

impl HookList {
    fn parse(line: &str) -> Option<Self> {
        let indent_len = line.len() - line.trim_start().len();
        let (indent, rest) = line.split_at(indent_len);
        let rest = rest.strip_prefix(HOOKS_KEY)?;

        let open = rest.chars().next()?;
        let close = match open {
            '(' => ')',
            '"' => '"',
            _ => return None,
        };

        let body = &rest[open.len_utf8()..];
        let end = body.find(close)?;
        let hooks = body[..end]
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        Some(Self {
            indent: indent.into(),
            open,
            close,
            hooks,
            trailer: body[end + close.len_utf8()..].into(),
        })
    }

    fn contains(&self, hook: &str) -> bool {
        self.hooks.iter().any(|listed| listed == hook)
    }
}

impl Display for HookList {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{}{HOOKS_KEY}{}{}{}{}",
            self.indent,
            self.open,
            self.hooks.join(" "),
            self.close,
            self.trailer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn insert_resume_after_filesystems() {
        let mut editor = HooksEdit::from(indoc! {r#"
            MODULES=()
            # HOOKS=(base udev)
            HOOKS=(base udev autodetect microcode modconf kms keyboard keymap consolefont block filesystems fsck)
            COMPRESSION="zstd"
        "#});

        assert_eq!(editor.ensure_resume(), HookStatus::Added);
        assert!(editor.is_changed());

        let expect = indoc! {r#"
            MODULES=()
            # HOOKS=(base udev)
            HOOKS=(base udev autodetect microcode modconf kms keyboard keymap consolefont block filesystems resume fsck)
            COMPRESSION="zstd"
        "#};
        assert_eq!(editor.to_string(), expect);
    }

    #[test]
    fn resume_is_never_duplicated() {
        let mut editor = HooksEdit::from("HOOKS=(base udev block filesystems fsck)\n");
        assert_eq!(editor.ensure_resume(), HookStatus::Added);

        let mut editor = HooksEdit::from(editor.to_string().as_str());
        assert_eq!(editor.ensure_resume(), HookStatus::Present);
        assert!(!editor.is_changed());

        let hooks = editor.hooks().unwrap_or_default();
        assert_eq!(hooks.iter().filter(|hook| *hook == "resume").count(), 1);
    }

    #[test_case(
        "HOOKS=(base udev block)",
        "HOOKS=(base udev block resume)";
        "missing filesystems hook"
    )]
    #[test_case(
        r#"HOOKS="base udev block filesystems""#,
        r#"HOOKS="base udev block filesystems resume""#;
        "string form"
    )]
    #[test_case(
        "HOOKS=(base udev filesystems) # stock",
        "HOOKS=(base udev filesystems resume) # stock";
        "trailing comment"
    )]
    #[test]
    fn hook_list_forms(line: &str, expect: &str) {
        let mut editor = HooksEdit::from(line);
        assert_eq!(editor.ensure_resume(), HookStatus::Added);
        assert_eq!(editor.to_string(), format!("{expect}\n"));
    }

    #[test]
    fn systemd_hook_needs_no_resume() {
        let mut editor = HooksEdit::from("HOOKS=(base systemd autodetect block filesystems fsck)\n");
        assert_eq!(editor.ensure_resume(), HookStatus::Systemd);
        assert!(!editor.is_changed());
    }

    #[test]
    fn missing_hook_list() {
        let mut editor = HooksEdit::from("MODULES=()\n");
        assert_eq!(editor.ensure_resume(), HookStatus::NoHooks);
        assert_eq!(editor.hooks(), None);
    }
}
