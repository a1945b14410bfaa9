// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mount table editing.
//!
//! The reconciler owns two lines in the mount table: one mounting the swap
//! subvolume, and one activating the swapfile at boot. Each line is guarded
//! by __markers__, substrings that identify the resource it manages, e.g.,
//! `subvol=@swap` or `subvol=/@swap`. A marker only counts when it ends at an
//! option or field boundary. If any existing line already contains a marker,
//! the entry counts as present and the table is left alone, even when the
//! operator wrote that line by hand with different options.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};

/// Single mount table entry managed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    markers: Vec<String>,
    line: String,
}

impl FstabEntry {
    /// Construct entry mounting a btrfs subvolume by file system UUID.
    ///
    /// Matches the subvolume with or without a leading slash, since btrfs
    /// accepts both spellings.
    pub fn subvolume(uuid: &str, mount_point: &Path, subvolume: &str) -> Self {
        let name = subvolume.trim_start_matches('/');
        Self {
            markers: vec![format!("subvol={name}"), format!("subvol=/{name}")],
            line: format!(
                "UUID={uuid} {} btrfs subvol={subvolume},noatime 0 0",
                mount_point.display()
            ),
        }
    }

    /// Construct entry activating a swapfile.
    pub fn swapfile(path: &Path) -> Self {
        Self {
            markers: vec![path.display().to_string()],
            line: format!("{} none swap defaults 0 0", path.display()),
        }
    }

    /// Substrings identifying this entry, any one of which suffices.
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Full line to append when the entry is missing.
    pub fn line(&self) -> &str {
        &self.line
    }
}

/// Mount table editor.
///
/// # Invariant
///
/// - Existing lines are never rewritten or reordered.
/// - At most one line per marker is ever added.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FstabEdit {
    lines: Vec<String>,
    changed: bool,
}

impl FstabEdit {
    /// Check if any line contains a marker of the entry.
    pub fn contains(&self, entry: &FstabEntry) -> bool {
        self.lines.iter().any(|line| {
            entry
                .markers()
                .iter()
                .any(|marker| contains_marker(line, marker))
        })
    }

    /// Append entry unless a line with one of its markers already exists.
    ///
    /// Returns `true` if the entry was appended.
    pub fn ensure_entry(&mut self, entry: &FstabEntry) -> bool {
        if self.contains(entry) {
            return false;
        }

        self.lines.push(entry.line().to_string());
        self.changed = true;
        true
    }

    /// Check if table differs from what it was parsed from.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

// INVARIANT: Marker must end at a field or option boundary.
fn contains_marker(line: &str, marker: &str) -> bool {
    line.match_indices(marker).any(|(index, _)| {
        line[index + marker.len()..]
            .chars()
            .next()
            .is_none_or(|next| next == ',' || next.is_whitespace())
    })
}

impl Display for FstabEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            writeln!(fmt, "{line}")?;
        }

        Ok(())
    }
}

impl From<&str> for FstabEdit {
    fn from(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_owned).collect(),
            changed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    const TABLE: &str = indoc! {r#"
        # <file system> <dir> <type> <options> <dump> <pass>
        UUID=1111-2222 / btrfs subvol=@,compress=zstd 0 0
        UUID=AAAA-BBBB /boot vfat defaults 0 2
    "#};

    #[test]
    fn append_missing_entries() {
        let mut editor = FstabEdit::from(TABLE);
        let subvolume = FstabEntry::subvolume("1111-2222", Path::new("/swap"), "@swap");
        let swapfile = FstabEntry::swapfile(Path::new("/swap/swapfile"));

        assert!(editor.ensure_entry(&subvolume));
        assert!(editor.ensure_entry(&swapfile));
        assert!(editor.is_changed());

        let expect = indoc! {r#"
            # <file system> <dir> <type> <options> <dump> <pass>
            UUID=1111-2222 / btrfs subvol=@,compress=zstd 0 0
            UUID=AAAA-BBBB /boot vfat defaults 0 2
            UUID=1111-2222 /swap btrfs subvol=@swap,noatime 0 0
            /swap/swapfile none swap defaults 0 0
        "#};
        assert_eq!(editor.to_string(), expect);
    }

    #[test]
    fn no_duplicate_entries() {
        let mut editor = FstabEdit::from(TABLE);
        let swapfile = FstabEntry::swapfile(Path::new("/swap/swapfile"));

        assert!(editor.ensure_entry(&swapfile));
        let once = editor.to_string();

        let mut editor = FstabEdit::from(once.as_str());
        assert!(!editor.ensure_entry(&swapfile));
        assert!(!editor.is_changed());
        assert_eq!(editor.to_string(), once);
    }

    #[test]
    fn hand_written_entry_counts_as_present() {
        let mut editor = FstabEdit::from(indoc! {r#"
            /dev/sda2 /swap btrfs subvol=@swap,nodatacow 0 0
        "#});
        let subvolume = FstabEntry::subvolume("1111-2222", Path::new("/swap"), "@swap");

        assert!(!editor.ensure_entry(&subvolume));
        assert!(!editor.is_changed());
    }

    #[test_case("UUID=1111-2222 /swap btrfs subvol=/@swap,noatime 0 0", true; "leading slash")]
    #[test_case("UUID=1111-2222 /swap btrfs noatime,subvol=@swap 0 0", true; "last option")]
    #[test_case("UUID=1111-2222 /swap2 btrfs subvol=@swap2,noatime 0 0", false; "longer name")]
    #[test_case("# UUID=1111-2222 /swap btrfs subvol=@swap", true; "end of line")]
    #[test]
    fn subvolume_marker_spellings(line: &str, present: bool) {
        let editor = FstabEdit::from(line);
        let subvolume = FstabEntry::subvolume("1111-2222", Path::new("/swap"), "@swap");

        assert_eq!(editor.contains(&subvolume), present);
    }

    #[test]
    fn swapfile_marker_ignores_similar_paths() {
        let mut editor = FstabEdit::from("/swap/swapfile.old none swap defaults 0 0\n");
        let swapfile = FstabEntry::swapfile(Path::new("/swap/swapfile"));

        assert!(editor.ensure_entry(&swapfile));
        assert_eq!(
            editor.to_string(),
            "/swap/swapfile.old none swap defaults 0 0\n/swap/swapfile none swap defaults 0 0\n"
        );
    }
}
