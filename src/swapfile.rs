// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Swapfile sizing and resume offset lookup.
//!
//! A swapfile on btrfs cannot be grown in place. Its extents must be
//! allocated while copy-on-write is disabled, and the resume offset handed
//! to the kernel points at the first of those extents. So a swapfile that is
//! too small gets thrown away and allocated again from scratch, and the
//! resume offset is looked up again on every run.
//!
//! The offset cannot come from FIEMAP based tools like filefrag, because on
//! btrfs those report addresses in the file system's own logical address
//! space. `btrfs inspect-internal map-swapfile` maps the first extent through
//! the chunk tree, and reports the offset on the device in pages, which is
//! exactly what `resume_offset=` expects.

/// What to do with the swapfile given its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapfilePlan {
    /// Existing swapfile is big enough, and formatted as swap.
    Keep,

    /// No swapfile exists yet.
    Create,

    /// Existing swapfile is undersized or unformatted, and must be removed
    /// first.
    Recreate { current: u64 },
}

impl SwapfilePlan {
    /// Decide what to do with a swapfile of `current` bytes, if any.
    ///
    /// A file lacking a swap signature is a leftover of an interrupted run,
    /// so it gets recreated no matter its size.
    pub fn new(current: Option<u64>, formatted: bool, required: u64) -> Self {
        match current {
            None => Self::Create,
            Some(current) if current < required || !formatted => Self::Recreate { current },
            Some(_) => Self::Keep,
        }
    }
}

/// Extract resume offset from `btrfs inspect-internal map-swapfile` output.
///
/// With `-r` the tool prints nothing but the offset. Without it, the offset
/// sits on a "Resume offset:" line below the physical start.
pub fn parse_resume_offset(output: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let line = line.trim();
        line.strip_prefix("Resume offset:")
            .unwrap_or(line)
            .trim()
            .parse::<u64>()
            .ok()
    })
}
