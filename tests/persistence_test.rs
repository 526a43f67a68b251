//! Durability scenarios: everything a mounted handle does must survive
//! unmount, process handover (a fresh device on the same image), and the
//! bitmap rebuild on the next mount.

use simplefs::prelude::*;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

#[tokio::test]
async fn test_remount_preserves_files_and_bitmap() {
    env_logger::builder().is_test(true).try_init().ok();

    let temp_dir = tempfile::tempdir().unwrap();
    let device_path = temp_dir.path().join("remount.img");

    let device = Arc::new(
        FileBackedBlockDevice::open(&device_path, 200)
            .await
            .unwrap(),
    );
    let mut fs = FileSystem::new();
    fs.format(device.as_ref()).await.unwrap();
    fs.mount(device.clone()).await.unwrap();

    let inode = fs.create().await.unwrap();
    let pattern = vec![0x5Au8; 6 * BLOCK_SIZE];
    fs.write(inode, &pattern, 0).await.unwrap();
    let free_before = fs.free_blocks().unwrap();

    fs.unmount().unwrap();
    fs.mount(device.clone()).await.unwrap();

    // Size and contents are intact
    assert_eq!(fs.stat(inode).await.unwrap() as usize, 6 * BLOCK_SIZE);
    let mut out = vec![0u8; 6 * BLOCK_SIZE];
    assert_eq!(fs.read(inode, &mut out, 0).await.unwrap(), 6 * BLOCK_SIZE);
    assert!(out.iter().all(|&b| b == 0x5A));

    // The rebuilt bitmap accounts for exactly the same blocks, so the
    // next write picks a still-free index rather than a referenced one
    assert_eq!(fs.free_blocks().unwrap(), free_before);
    let second = fs.create().await.unwrap();
    fs.write(second, b"fresh", 0).await.unwrap();

    let report = FileSystem::debug(device.as_ref()).await.unwrap();
    // Data starts at 21; the first file took 21..=27, so the new file
    // gets block 28
    assert!(report.contains("    direct blocks: 28\n"));
}

#[tokio::test]
async fn test_new_device_handle_on_the_same_image() {
    env_logger::builder().is_test(true).try_init().ok();

    let temp_dir = tempfile::tempdir().unwrap();
    let device_path = temp_dir.path().join("handover.img");

    {
        let device = Arc::new(
            FileBackedBlockDevice::open(&device_path, 100)
                .await
                .unwrap(),
        );
        let mut fs = FileSystem::new();
        fs.format(device.as_ref()).await.unwrap();
        fs.mount(device.clone()).await.unwrap();

        let inode = fs.create().await.unwrap();
        fs.write(inode, b"This data should persist to disk!", 0)
            .await
            .unwrap();

        fs.unmount().unwrap();
        device.close().await.unwrap();
    }

    // A brand new device and handle, as after a process restart
    let device = Arc::new(
        FileBackedBlockDevice::open(&device_path, 100)
            .await
            .unwrap(),
    );
    let mut fs = FileSystem::new();
    fs.mount(device.clone()).await.unwrap();

    let mut out = [0u8; 33];
    assert_eq!(fs.read(0, &mut out, 0).await.unwrap(), 33);
    assert_eq!(&out[..], b"This data should persist to disk!");
}

#[tokio::test]
async fn test_written_bytes_reach_the_raw_image() {
    env_logger::builder().is_test(true).try_init().ok();

    let temp_dir = tempfile::tempdir().unwrap();
    let device_path = temp_dir.path().join("raw_check.img");

    let device = Arc::new(
        FileBackedBlockDevice::open(&device_path, 100)
            .await
            .unwrap(),
    );
    let mut fs = FileSystem::new();
    fs.format(device.as_ref()).await.unwrap();
    fs.mount(device.clone()).await.unwrap();

    let inode = fs.create().await.unwrap();
    let test_data = b"simplefs write-through marker";
    fs.write(inode, test_data, 0).await.unwrap();

    // No unmount, no close: write-through means the bytes are already in
    // the image file
    let mut image = Vec::new();
    File::open(&device_path)
        .unwrap()
        .read_to_end(&mut image)
        .unwrap();
    let found = image
        .windows(test_data.len())
        .any(|window| window == test_data);
    assert!(found, "written data not found in the raw image");
}

#[tokio::test]
async fn test_format_resets_a_used_disk() {
    env_logger::builder().is_test(true).try_init().ok();

    let temp_dir = tempfile::tempdir().unwrap();
    let device_path = temp_dir.path().join("reformat.img");

    let device = Arc::new(
        FileBackedBlockDevice::open(&device_path, 100)
            .await
            .unwrap(),
    );
    let mut fs = FileSystem::new();
    fs.format(device.as_ref()).await.unwrap();
    fs.mount(device.clone()).await.unwrap();

    for _ in 0..5 {
        let inode = fs.create().await.unwrap();
        fs.write(inode, &[0x99u8; 2000], 0).await.unwrap();
    }
    fs.unmount().unwrap();

    // Reformat and remount: no inodes survive, the data region is whole
    fs.format(device.as_ref()).await.unwrap();
    fs.mount(device.clone()).await.unwrap();
    assert_eq!(fs.free_blocks().unwrap(), 89);
    for inode_number in 0..5 {
        assert!(matches!(
            fs.stat(inode_number).await,
            Err(FsError::InvalidInode)
        ));
    }

    let report = FileSystem::debug(device.as_ref()).await.unwrap();
    assert!(!report.contains("Inode"));
}
