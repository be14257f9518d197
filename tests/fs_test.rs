//! End-to-end tests of the flat file system over a scratch disk image.

use assert_matches::assert_matches;
use itertools::Itertools;
use tempfile::TempDir;

use flatfs::param::{BLOCK_SIZE, MAX_FDS, MAX_FILES, MAX_FILE_SIZE};
use flatfs::{mkfs, FsError, Volume};

fn fresh_volume() -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.img");
    mkfs(&path).unwrap();
    (dir, path)
}

/// Contract: create, write, seek, read round-trips bytes exactly.
#[test]
fn round_trip_one_thousand_bytes() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("myfile").unwrap();
    let fd = vol.open("myfile").unwrap();
    assert!(fd.index() < MAX_FDS);

    let data = vec![b'a'; 1000];
    assert_eq!(vol.write(fd, &data).unwrap(), 1000);
    vol.seek(fd, 0).unwrap();

    let mut back = vec![0u8; 1000];
    assert_eq!(vol.read(fd, &mut back).unwrap(), 1000);
    assert_eq!(back, data);

    vol.check().unwrap();
    vol.close(fd).unwrap();
    vol.delete("myfile").unwrap();
    vol.check().unwrap();
    vol.unmount().unwrap();
}

/// Contract: a write crossing a block boundary spans exactly the blocks it
/// needs and reads back intact.
#[test]
fn cross_block_write_spans_two_blocks() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("f").unwrap();
    let fd = vol.open("f").unwrap();

    let data = vec![0xCD; 5000];
    assert_eq!(vol.write(fd, &data).unwrap(), 5000);
    assert_eq!(vol.file_size(fd).unwrap(), 5000);
    assert_eq!(vol.allocated_blocks(fd).unwrap(), 2);

    vol.seek(fd, 0).unwrap();
    let mut back = vec![0u8; 5000];
    assert_eq!(vol.read(fd, &mut back).unwrap(), 5000);
    assert_eq!(back, data);
    vol.check().unwrap();
}

/// Contract: an open file cannot be deleted; a closed one can.
#[test]
fn open_file_cannot_be_deleted() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("x").unwrap();
    let fd = vol.open("x").unwrap();
    assert_matches!(vol.delete("x"), Err(FsError::FileBusy));

    vol.close(fd).unwrap();
    vol.delete("x").unwrap();
    assert!(vol.list_files().is_empty());
}

/// Contract: names up to 15 bytes are accepted, 16 bytes are refused.
#[test]
fn name_length_boundary() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("abcdefghijklmno").unwrap();
    assert_matches!(vol.create("abcdefghijklmnop"), Err(FsError::TooLong));
    assert_matches!(vol.open("abcdefghijklmnop"), Err(FsError::TooLong));
    assert_eq!(vol.list_files(), vec!["abcdefghijklmno"]);
}

/// Contract: exactly MAX_FILES files fit; deleting one frees a slot.
#[test]
fn directory_capacity() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    for i in 0..MAX_FILES {
        vol.create(&format!("file{:02}", i)).unwrap();
    }
    assert_eq!(vol.list_files().len(), MAX_FILES);
    assert_matches!(vol.create("straw"), Err(FsError::DirectoryFull));

    vol.delete("file17").unwrap();
    vol.create("straw").unwrap();
    vol.check().unwrap();
}

/// Contract: a deleted slot is reused by the next create, in slot order.
#[test]
fn create_fills_lowest_free_slot() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    for name in ["a", "b", "c"] {
        vol.create(name).unwrap();
    }
    vol.delete("b").unwrap();
    vol.create("d").unwrap();
    assert_eq!(vol.list_files(), vec!["a", "d", "c"]);
}

/// Contract: metadata and data survive unmount/mount.
#[test]
fn persistence_across_remount() {
    let (_dir, path) = fresh_volume();

    let mut vol = Volume::mount(&path).unwrap();
    vol.create("p").unwrap();
    let fd = vol.open("p").unwrap();
    assert_eq!(vol.write(fd, b"hello").unwrap(), 5);
    vol.close(fd).unwrap();
    vol.unmount().unwrap();

    let mut vol = Volume::mount(&path).unwrap();
    let fd = vol.open("p").unwrap();
    assert_eq!(vol.file_size(fd).unwrap(), 5);
    let mut back = [0u8; 5];
    assert_eq!(vol.read(fd, &mut back).unwrap(), 5);
    assert_eq!(&back, b"hello");
}

/// Contract: the full directory state round-trips through a remount,
/// including sizes, contents, and slot order.
#[test]
fn remount_preserves_many_files() {
    let (_dir, path) = fresh_volume();
    let sizes = [0usize, 1, 4095, 4096, 4097, 20000];

    let mut vol = Volume::mount(&path).unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        let name = format!("f{}", i);
        vol.create(&name).unwrap();
        let fd = vol.open(&name).unwrap();
        let data = (0..size).map(|b| (b % 251) as u8).collect_vec();
        assert_eq!(vol.write(fd, &data).unwrap(), size);
        vol.close(fd).unwrap();
    }
    vol.check().unwrap();
    vol.unmount().unwrap();

    let mut vol = Volume::mount(&path).unwrap();
    vol.check().unwrap();
    assert_eq!(
        vol.list_files(),
        (0..sizes.len()).map(|i| format!("f{}", i)).collect_vec()
    );
    for (i, &size) in sizes.iter().enumerate() {
        let fd = vol.open(&format!("f{}", i)).unwrap();
        assert_eq!(vol.file_size(fd).unwrap() as usize, size);
        let mut back = vec![0u8; size + 7];
        assert_eq!(vol.read(fd, &mut back).unwrap(), size);
        let expected = (0..size).map(|b| (b % 251) as u8).collect_vec();
        assert_eq!(&back[..size], &expected[..]);
        vol.close(fd).unwrap();
    }
    vol.unmount().unwrap();
}

/// Contract: truncate shrinks size and chain; reading at the new end
/// returns zero bytes.
#[test]
fn truncate_then_read() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("t").unwrap();
    let fd = vol.open("t").unwrap();
    vol.write(fd, &vec![7u8; 10000]).unwrap();
    assert_eq!(vol.allocated_blocks(fd).unwrap(), 3);

    vol.truncate(fd, 4096).unwrap();
    assert_eq!(vol.file_size(fd).unwrap(), 4096);
    assert_eq!(vol.allocated_blocks(fd).unwrap(), 1);

    vol.seek(fd, 4096).unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(vol.read(fd, &mut buf).unwrap(), 0);

    // Truncating to the current size is a no-op; growing is refused.
    vol.truncate(fd, 4096).unwrap();
    assert_matches!(vol.truncate(fd, 4097), Err(FsError::OffsetOutOfRange));
    vol.check().unwrap();
}

/// Contract: truncate to zero keeps the head block and the file grows
/// again from a clean slate.
#[test]
fn truncate_to_zero_and_regrow() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("t").unwrap();
    let fd = vol.open("t").unwrap();
    vol.write(fd, &vec![1u8; 9000]).unwrap();
    let free_before = vol.free_blocks();

    vol.truncate(fd, 0).unwrap();
    assert_eq!(vol.file_size(fd).unwrap(), 0);
    assert_eq!(vol.allocated_blocks(fd).unwrap(), 1);
    assert_eq!(vol.free_blocks(), free_before + 2);

    assert_eq!(vol.write(fd, b"fresh").unwrap(), 5);
    vol.seek(fd, 0).unwrap();
    let mut back = [0u8; 5];
    vol.read(fd, &mut back).unwrap();
    assert_eq!(&back, b"fresh");
    vol.check().unwrap();
}

/// Contract: only the truncating descriptor is clamped; another
/// descriptor's stale offset reads zero bytes and cannot be re-seeked
/// past the new end.
#[test]
fn truncate_leaves_other_descriptors_alone() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("shared").unwrap();
    let fd1 = vol.open("shared").unwrap();
    let fd2 = vol.open("shared").unwrap();

    vol.write(fd1, &vec![9u8; 9000]).unwrap();
    vol.seek(fd2, 8000).unwrap();

    vol.truncate(fd1, 100).unwrap();

    // fd1 was clamped to the new end.
    let mut buf = [0u8; 16];
    assert_eq!(vol.read(fd1, &mut buf).unwrap(), 0);
    vol.seek(fd1, 0).unwrap();
    assert_eq!(vol.read(fd1, &mut buf).unwrap(), 16);

    // fd2 keeps its stale offset: reads nothing, cannot seek back there.
    assert_eq!(vol.read(fd2, &mut buf).unwrap(), 0);
    assert_matches!(vol.seek(fd2, 8000), Err(FsError::OffsetOutOfRange));
    vol.seek(fd2, 100).unwrap();
    vol.check().unwrap();
}

/// Contract: closing a descriptor twice fails the second time and does not
/// double-decrement the reference count.
#[test]
fn double_close_fails_cleanly() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("x").unwrap();
    let fd_a = vol.open("x").unwrap();
    let fd_b = vol.open("x").unwrap();

    vol.close(fd_a).unwrap();
    assert_matches!(vol.close(fd_a), Err(FsError::BadDescriptor));

    // fd_b still pins the file.
    assert_matches!(vol.delete("x"), Err(FsError::FileBusy));
    vol.check().unwrap();
    vol.close(fd_b).unwrap();
    vol.delete("x").unwrap();
}

/// Contract: seek is bounded by the file size; end of file reads empty.
#[test]
fn seek_bounds() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("s").unwrap();
    let fd = vol.open("s").unwrap();
    vol.write(fd, b"0123456789").unwrap();

    assert_matches!(vol.seek(fd, 11), Err(FsError::OffsetOutOfRange));
    vol.seek(fd, 10).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(vol.read(fd, &mut buf).unwrap(), 0);

    vol.seek(fd, 6).unwrap();
    assert_eq!(vol.read(fd, &mut buf).unwrap(), 4);
    assert_eq!(&buf, b"6789");
}

/// Contract: reads are clamped at end of file and empty buffers transfer
/// nothing.
#[test]
fn read_and_write_clamping() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("c").unwrap();
    let fd = vol.open("c").unwrap();
    assert_eq!(vol.write(fd, &[]).unwrap(), 0);
    vol.write(fd, b"abcdef").unwrap();

    vol.seek(fd, 4).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(vol.read(fd, &mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"ef");
    assert_eq!(vol.read(fd, &mut []).unwrap(), 0);
}

/// Contract: an unaligned overwrite leaves the surrounding bytes intact.
#[test]
fn overwrite_preserves_neighbouring_bytes() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("o").unwrap();
    let fd = vol.open("o").unwrap();
    let original = (0..10000).map(|i| (i % 256) as u8).collect_vec();
    vol.write(fd, &original).unwrap();

    // Overwrite a range straddling the first block boundary.
    vol.seek(fd, 4000).unwrap();
    vol.write(fd, &[0xFF; 200]).unwrap();
    assert_eq!(vol.file_size(fd).unwrap(), 10000);

    vol.seek(fd, 0).unwrap();
    let mut back = vec![0u8; 10000];
    assert_eq!(vol.read(fd, &mut back).unwrap(), 10000);
    assert_eq!(&back[..4000], &original[..4000]);
    assert!(back[4000..4200].iter().all(|&b| b == 0xFF));
    assert_eq!(&back[4200..], &original[4200..]);
}

/// Contract: a write ending exactly on a block boundary allocates no
/// spare block; the next byte extends the chain.
#[test]
fn block_aligned_end_of_file() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("edge").unwrap();
    let fd = vol.open("edge").unwrap();
    assert_eq!(vol.write(fd, &vec![3u8; BLOCK_SIZE]).unwrap(), BLOCK_SIZE);
    assert_eq!(vol.allocated_blocks(fd).unwrap(), 1);

    assert_eq!(vol.write(fd, &[4u8]).unwrap(), 1);
    assert_eq!(vol.allocated_blocks(fd).unwrap(), 2);
    assert_eq!(vol.file_size(fd).unwrap(), BLOCK_SIZE as u32 + 1);

    vol.seek(fd, BLOCK_SIZE as u32 - 1).unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(vol.read(fd, &mut buf).unwrap(), 2);
    assert_eq!(buf, [3, 4]);
    vol.check().unwrap();
}

/// Contract: writes clamp at the file size cap, and the capped file
/// survives a remount (its chain exercises the whole FAT window).
#[test]
fn write_clamps_at_max_file_size() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("big").unwrap();
    let fd = vol.open("big").unwrap();

    let mut data = vec![0xA5u8; MAX_FILE_SIZE as usize + 100];
    let last = data.len() - 101;
    data[0] = 0x10;
    data[last] = 0x20;
    assert_eq!(vol.write(fd, &data).unwrap(), MAX_FILE_SIZE as usize);
    assert_eq!(vol.file_size(fd).unwrap(), MAX_FILE_SIZE);

    // At the cap, further writes transfer nothing.
    assert_eq!(vol.write(fd, b"x").unwrap(), 0);
    vol.check().unwrap();
    vol.close(fd).unwrap();
    vol.unmount().unwrap();

    let mut vol = Volume::mount(&path).unwrap();
    vol.check().unwrap();
    let fd = vol.open("big").unwrap();
    assert_eq!(vol.file_size(fd).unwrap(), MAX_FILE_SIZE);

    let mut probe = [0u8; 1];
    assert_eq!(vol.read(fd, &mut probe).unwrap(), 1);
    assert_eq!(probe[0], 0x10);
    vol.seek(fd, MAX_FILE_SIZE - 1).unwrap();
    assert_eq!(vol.read(fd, &mut probe).unwrap(), 1);
    assert_eq!(probe[0], 0x20);
}

/// Contract: when the disk runs out of blocks mid-write, the bytes that
/// fit are written and counted; freeing space makes writes work again.
#[test]
fn disk_full_yields_partial_write() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("a").unwrap();
    let fd_a = vol.open("a").unwrap();
    let big = vec![1u8; MAX_FILE_SIZE as usize];
    assert_eq!(vol.write(fd_a, &big).unwrap(), MAX_FILE_SIZE as usize);
    vol.close(fd_a).unwrap();

    vol.create("b").unwrap();
    let fd_b = vol.open("b").unwrap();
    let writable = (1 + vol.free_blocks()) * BLOCK_SIZE;
    assert!(writable < big.len());

    let written = vol.write(fd_b, &big).unwrap();
    assert_eq!(written, writable);
    assert_eq!(vol.file_size(fd_b).unwrap() as usize, written);
    assert_eq!(vol.free_blocks(), 0);

    // Not a single further byte fits.
    assert_matches!(vol.write(fd_b, b"x"), Err(FsError::DiskFull));
    vol.check().unwrap();

    // Deleting the hog frees its chain for new writes.
    vol.delete("a").unwrap();
    assert!(vol.free_blocks() > 0);
    assert_eq!(vol.write(fd_b, b"x").unwrap(), 1);
    vol.close(fd_b).unwrap();
    vol.check().unwrap();
}

/// Contract: the descriptor table holds MAX_FDS open handles and reuses
/// the lowest free index.
#[test]
fn descriptor_table_capacity() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("f").unwrap();
    let fds = (0..MAX_FDS).map(|_| vol.open("f").unwrap()).collect_vec();
    assert_matches!(vol.open("f"), Err(FsError::FdTableFull));

    vol.close(fds[5]).unwrap();
    let reused = vol.open("f").unwrap();
    assert_eq!(reused.index(), 5);
    vol.check().unwrap();
}

/// Contract: descriptors on the same file advance independently.
#[test]
fn descriptors_are_independent() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    vol.create("f").unwrap();
    let writer = vol.open("f").unwrap();
    let reader = vol.open("f").unwrap();

    vol.write(writer, b"shared bytes").unwrap();
    let mut buf = [0u8; 12];
    assert_eq!(vol.read(reader, &mut buf).unwrap(), 12);
    assert_eq!(&buf, b"shared bytes");

    // The writer's offset is untouched by the reader's progress.
    vol.write(writer, b"!").unwrap();
    assert_eq!(vol.file_size(writer).unwrap(), 13);
}

/// Contract: lookup failures and name validation map to distinct errors.
#[test]
fn name_and_lookup_errors() {
    let (_dir, path) = fresh_volume();
    let mut vol = Volume::mount(&path).unwrap();

    assert_matches!(vol.create(""), Err(FsError::BadName));
    assert_matches!(vol.open("ghost"), Err(FsError::NotFound));
    assert_matches!(vol.delete("ghost"), Err(FsError::NotFound));

    vol.create("twice").unwrap();
    assert_matches!(vol.create("twice"), Err(FsError::AlreadyExists));
}

/// Contract: images that were never formatted are refused.
#[test]
fn mount_rejects_unformatted_images() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.img");
    assert_matches!(Volume::mount(&missing), Err(FsError::NotFormatted));

    let short = dir.path().join("short.img");
    std::fs::write(&short, b"not a volume").unwrap();
    assert_matches!(Volume::mount(&short), Err(FsError::NotFormatted));

    let zeroed = dir.path().join("zeroed.img");
    let file = std::fs::File::create(&zeroed).unwrap();
    file.set_len((flatfs::param::DISK_BLOCKS * BLOCK_SIZE) as u64)
        .unwrap();
    drop(file);
    assert_matches!(Volume::mount(&zeroed), Err(FsError::NotFormatted));
}

/// Contract: mkfs on an existing image wipes it.
#[test]
fn mkfs_reformats_in_place() {
    let (_dir, path) = fresh_volume();

    let mut vol = Volume::mount(&path).unwrap();
    vol.create("doomed").unwrap();
    vol.unmount().unwrap();

    mkfs(&path).unwrap();
    let vol = Volume::mount(&path).unwrap();
    assert!(vol.list_files().is_empty());
    vol.check().unwrap();
}
