// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Swapfile hibernation setup for btrfs hosts.
//!
//! Hibernating to a swapfile on btrfs takes more than a `swapon`. The
//! swapfile needs its own subvolume, copy-on-write has to be disabled
//! before any of its blocks are allocated, the kernel has to be told the
//! physical offset of the file on disk, and the initramfs has to know how to
//! resume at all. This crate reconciles all of that on the running host.
//!
//! # Idempotence
//!
//! Every step checks the host before touching it. Running the reconciler on
//! a host it already configured does not add a second mount table line, a
//! second kernel parameter, or a second initramfs hook.
//!
//! # See Also
//!
//! 1. [ArchWiki - Hibernation into swap file on Btrfs](https://wiki.archlinux.org/title/Power_management/Suspend_and_hibernate#Hibernation_into_swap_file_on_Btrfs)
//! 2. [`Reconciler`]

pub mod boot;
pub mod config;
pub mod device;
pub mod fstab;
pub mod host;
pub mod initramfs;
pub mod reconcile;
pub mod size;
pub mod swapfile;

pub use crate::{
    config::Layout,
    host::{Host, SystemHost},
    reconcile::{Reconciler, Report},
    size::SwapSize,
};
