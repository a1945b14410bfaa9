// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::HostFixture;

use anyhow::Result;
use btrfs_hibernate::device::{resolve_root_device, DeviceError, MountSource};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

#[test]
fn luks_source_passes_through() -> Result<()> {
    let host = HostFixture::default().with_block_device("/dev/mapper/luks-0b7d");

    let device = resolve_root_device("/dev/mapper/luks-0b7d[/@]\n", &host)?;
    assert_eq!(device, PathBuf::from("/dev/mapper/luks-0b7d"));
    assert!(host.commands().is_empty());

    Ok(())
}

#[test]
fn mapper_source_passes_through() -> Result<()> {
    let host = HostFixture::default().with_block_device("/dev/mapper/vg0-root");

    let device = resolve_root_device("/dev/mapper/vg0-root[/@]", &host)?;
    assert_eq!(device, PathBuf::from("/dev/mapper/vg0-root"));

    Ok(())
}

#[test]
fn symlink_to_dm_node_uses_mapper_name() -> Result<()> {
    let host = HostFixture::default()
        .with_block_device("/dev/dm-3")
        .with_block_device("/dev/mapper/vg0-lv0")
        .with_symlink("/dev/disk/by-uuid/5e1c", "/dev/dm-3")
        .with_mapper_name("/dev/dm-3", "vg0-lv0");

    let device = resolve_root_device("/dev/disk/by-uuid/5e1c", &host)?;
    assert_eq!(device, PathBuf::from("/dev/mapper/vg0-lv0"));
    assert_eq!(
        host.commands(),
        vec!["dmsetup info -c --noheadings -o name /dev/dm-3".to_string()]
    );

    Ok(())
}

#[test]
fn symlink_to_unnamed_dm_node_keeps_node() -> Result<()> {
    let host = HostFixture::default()
        .with_block_device("/dev/dm-3")
        .with_symlink("/dev/disk/by-uuid/5e1c", "/dev/dm-3");

    let device = resolve_root_device("/dev/disk/by-uuid/5e1c", &host)?;
    assert_eq!(device, PathBuf::from("/dev/dm-3"));

    Ok(())
}

#[test]
fn symlink_to_partition_uses_target() -> Result<()> {
    let host = HostFixture::default()
        .with_block_device("/dev/sda2")
        .with_symlink("/dev/disk/by-label/root", "/dev/sda2");

    let device = resolve_root_device("/dev/disk/by-label/root[/@]", &host)?;
    assert_eq!(device, PathBuf::from("/dev/sda2"));
    assert!(host.commands().is_empty());

    Ok(())
}

#[test]
fn direct_source_strips_annotation() -> Result<()> {
    let host = HostFixture::default().with_block_device("/dev/nvme0n1p2");

    assert_eq!(
        MountSource::classify("/dev/nvme0n1p2[/@]", &host),
        MountSource::Direct("/dev/nvme0n1p2".into())
    );
    let device = resolve_root_device("/dev/nvme0n1p2[/@]", &host)?;
    assert_eq!(device, PathBuf::from("/dev/nvme0n1p2"));

    Ok(())
}

#[test]
fn missing_device_is_an_error() {
    let host = HostFixture::default();

    let result = resolve_root_device("/dev/nvme0n1p2[/@]", &host);
    assert!(matches!(
        result,
        Err(DeviceError::NotFound { ref resolved, .. }) if resolved == Path::new("/dev/nvme0n1p2")
    ));
}

#[test]
fn dangling_symlink_is_an_error() {
    let host = HostFixture::default().with_symlink("/dev/disk/by-uuid/5e1c", "/dev/dm-9");

    let result = resolve_root_device("/dev/disk/by-uuid/5e1c", &host);
    assert!(matches!(result, Err(DeviceError::Resolve { .. })));
}
