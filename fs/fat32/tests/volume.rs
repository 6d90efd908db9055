// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Volume engine tests over a synthetic in-memory image: a 1 MiB FAT32
//! volume with 512-byte clusters, two FAT copies and an empty root, built
//! the same way `mkfs.vfat` would lay it out.

use dassie_ds_mem::MemStorage;
use dassie_fs::{Error, FileSystem, FsError, Location};
use dassie_fs_fat32::Volume;

const SECTOR: usize = 512;
const RESERVED_SECTORS: usize = 4;
const NUM_FATS: usize = 2;
const SECTORS_PER_FAT: usize = 16;
const FAT_OFFSET: usize = RESERVED_SECTORS * SECTOR;
const FAT_SIZE: usize = SECTORS_PER_FAT * SECTOR;
const DATA_OFFSET: usize = FAT_OFFSET + NUM_FATS * FAT_SIZE;
const IMAGE_SIZE: usize = 1 << 20;

const END_OF_CHAIN: u32 = 0x0FFF_FFF8;
const ENTRIES_PER_CLUSTER: usize = SECTOR / 32;

fn set_fat(image: &mut [u8], index: usize, value: u32) {
    for copy in 0..NUM_FATS {
        let offset = FAT_OFFSET + copy * FAT_SIZE + index * 4;
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Empty volume: boot sector geometry, reserved FAT entries, terminated
/// root chain, zeroed data region.
fn blank_image() -> Vec<u8> {
    let mut image = vec![0u8; IMAGE_SIZE];
    image[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    image[13] = 1; // sectors per cluster
    image[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
    image[16] = NUM_FATS as u8;
    image[36..40].copy_from_slice(&(SECTORS_PER_FAT as u32).to_le_bytes());
    image[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster

    set_fat(&mut image, 0, 0x0FFF_FFF8);
    set_fat(&mut image, 1, 0x0FFF_FFFF);
    set_fat(&mut image, 2, END_OF_CHAIN);
    image
}

/// Blank volume plus one short-name-only file, `README.TXT`, written the way
/// a non-LFN implementation would: bare 8.3 record, content in cluster 3.
/// The cluster tail is filled with 0xFF to prove reads stop at the recorded
/// size.
fn seeded_image() -> Vec<u8> {
    let contents = b"hello, dassie\n";
    let mut image = blank_image();
    set_fat(&mut image, 3, END_OF_CHAIN);

    let root = DATA_OFFSET;
    image[root..root + 11].copy_from_slice(b"README  TXT");
    image[root + 11] = 0x20;
    image[root + 26..root + 28].copy_from_slice(&3u16.to_le_bytes());
    image[root + 28..root + 32].copy_from_slice(&(contents.len() as u32).to_le_bytes());

    let data = DATA_OFFSET + SECTOR;
    image[data..data + contents.len()].copy_from_slice(contents);
    for byte in &mut image[data + contents.len()..data + SECTOR] {
        *byte = 0xFF;
    }
    image
}

#[test]
fn mount_rejects_a_zeroed_image() {
    let storage = MemStorage::new(vec![0; IMAGE_SIZE]);
    assert!(matches!(
        Volume::mount(&storage),
        Err(Error::Fs(FsError::Inconsistent))
    ));
}

#[test]
fn empty_root_lists_nothing() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    assert!(volume.entries(&Location::root()).unwrap().is_empty());
}

#[test]
fn mkdir_lists_enters_and_leaves() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "foo").unwrap();
    let entries = volume.entries(&root).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "foo");
    assert!(entries[0].is_directory());

    let foo = volume.resolve(&root, "foo").unwrap();
    assert_eq!(foo.path, "/foo");
    assert!(volume.entries(&foo).unwrap().is_empty());

    let back = volume.resolve(&foo, "..").unwrap();
    assert_eq!(back, root);
}

#[test]
fn touch_creates_an_empty_file() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_file(&root, "readme.txt").unwrap();
    let entries = volume.entries(&root).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "readme.txt");
    assert!(!entries[0].is_directory());
    assert_eq!(entries[0].size, 0);
    assert_eq!(entries[0].first_cluster, 0);

    assert!(volume.read_file(&root, "readme.txt").unwrap().is_empty());
}

#[test]
fn nested_directories_resolve_up_and_down() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "a").unwrap();
    let a = volume.resolve(&root, "a").unwrap();
    volume.make_directory(&a, "b").unwrap();

    let b = volume.resolve(&root, "/a/b").unwrap();
    assert_eq!(b.path, "/a/b");

    let up = volume.resolve(&b, "..").unwrap();
    assert_eq!(up.path, "/a");
    assert_eq!(up.cluster, a.cluster);
    let up = volume.resolve(&up, "..").unwrap();
    assert_eq!(up, root);

    // Mixed segments in one walk.
    let again = volume.resolve(&root, "a/./b/../b").unwrap();
    assert_eq!(again, b);
}

#[test]
fn dot_resolution_is_idempotent_and_root_has_no_parent() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    assert_eq!(volume.resolve(&root, ".").unwrap(), root);
    assert_eq!(volume.resolve(&root, "..").unwrap(), root);
    assert_eq!(volume.resolve(&root, "/").unwrap(), root);
}

#[test]
fn long_names_produce_a_reverse_ordered_run() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    // 21 characters: two fragments plus the 8.3 record.
    volume
        .make_directory(&root, "verylongdirectoryname")
        .unwrap();

    let slots = storage.snapshot(DATA_OFFSET, 3 * 32);
    assert_eq!(slots[0], 0x40 | 2);
    assert_eq!(slots[11], 0x0F);
    assert_eq!(slots[32], 0x01);
    assert_eq!(slots[32 + 11], 0x0F);
    assert_eq!(slots[64 + 11], 0x10);

    let entries = volume.entries(&root).unwrap();
    assert_eq!(entries[0].name, "verylongdirectoryname");
}

#[test]
fn fragment_checksums_match_the_short_name() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume
        .make_directory(&root, "verylongdirectoryname")
        .unwrap();

    let slots = storage.snapshot(DATA_OFFSET, 3 * 32);
    let mut sum = 0u8;
    for &byte in &slots[64..64 + 11] {
        sum = ((sum & 1) << 7)
            .wrapping_add(sum >> 1)
            .wrapping_add(byte);
    }
    assert_eq!(slots[13], sum);
    assert_eq!(slots[32 + 13], sum);
}

#[test]
fn allocation_terminates_the_chain_and_moves_on() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "x").unwrap();
    let entries = volume.entries(&root).unwrap();
    let x = &entries[0];
    assert_eq!(x.first_cluster, 3);
    assert_eq!(volume.fat_read(x.first_cluster).unwrap(), END_OF_CHAIN);

    // The free scan must not hand that index out again.
    volume.make_directory(&root, "y").unwrap();
    let entries = volume.entries(&root).unwrap();
    assert_eq!(entries[1].first_cluster, 4);
}

#[test]
fn every_fat_copy_reads_identically_after_mutations() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "a").unwrap();
    volume.make_directory(&root, "a/deeper").unwrap();
    volume.make_file(&root, "a/deeper/file.txt").unwrap();

    assert_eq!(
        storage.snapshot(FAT_OFFSET, FAT_SIZE),
        storage.snapshot(FAT_OFFSET + FAT_SIZE, FAT_SIZE)
    );
}

#[test]
fn child_of_root_points_back_with_cluster_zero() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "child").unwrap();
    let child = volume.entries(&root).unwrap()[0].first_cluster;

    let payload = volume.cluster_read(child).unwrap();
    assert_eq!(payload[..2], *b". ");
    assert_eq!(payload[32..34], *b"..");
    // `..` of a root child records cluster 0, which readers map to 2.
    assert_eq!(payload[32 + 26..32 + 28], [0, 0]);
    assert_eq!(payload[32 + 20..32 + 22], [0, 0]);

    let up = volume.resolve(&root, "child/..").unwrap();
    assert_eq!(up, root);
}

#[test]
fn nested_child_points_back_at_its_parent() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "a").unwrap();
    let a = volume.resolve(&root, "a").unwrap();
    volume.make_directory(&a, "b").unwrap();
    let b = volume.resolve(&a, "b").unwrap();

    let payload = volume.cluster_read(b.cluster).unwrap();
    let low = u16::from_le_bytes([payload[32 + 26], payload[32 + 27]]) as u32;
    let high = u16::from_le_bytes([payload[32 + 20], payload[32 + 21]]) as u32;
    assert_eq!(high << 16 | low, a.cluster);
}

#[test]
fn names_round_trip_through_creation_and_resolution() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    let names = [
        "a".to_string(),
        "exactly13char".to_string(),
        "fourteen chars".to_string(),
        "Mixed.Case-Name_01".to_string(),
        "x".repeat(255),
    ];
    for name in &names {
        volume.make_directory(&root, name).unwrap();
        let resolved = volume.resolve(&root, name).unwrap();
        assert_eq!(resolved.path, format!("/{name}"));
    }
    let listed: Vec<String> = volume
        .entries(&root)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(listed, names);
}

#[test]
fn entry_runs_spill_across_cluster_boundaries() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    // Each short-named directory occupies two records; eight fill the root
    // cluster exactly, the ninth forces a chain extension.
    assert_eq!(ENTRIES_PER_CLUSTER, 16);
    for index in 0..9 {
        volume.make_directory(&root, &format!("d{index}")).unwrap();
    }
    assert_ne!(volume.fat_read(2).unwrap(), END_OF_CHAIN);

    let listed = volume.entries(&root).unwrap();
    assert_eq!(listed.len(), 9);
    for (index, entry) in listed.iter().enumerate() {
        assert_eq!(entry.name, format!("d{index}"));
    }
}

#[test]
fn duplicate_names_are_rejected() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "foo").unwrap();
    assert!(matches!(
        volume.make_directory(&root, "foo"),
        Err(Error::Fs(FsError::AlreadyExists))
    ));
    assert!(matches!(
        volume.make_file(&root, "foo"),
        Err(Error::Fs(FsError::AlreadyExists))
    ));
}

#[test]
fn missing_components_are_not_found() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    assert!(matches!(
        volume.resolve(&root, "missing"),
        Err(Error::Fs(FsError::NotFound))
    ));
    assert!(matches!(
        volume.read_file(&root, "missing"),
        Err(Error::Fs(FsError::NotFound))
    ));
    assert!(matches!(
        volume.make_directory(&root, "missing/child"),
        Err(Error::Fs(FsError::NotFound))
    ));
}

#[test]
fn short_name_only_entries_read_back() {
    let storage = MemStorage::new(seeded_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    let entries = volume.entries(&root).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "README.TXT");
    assert_eq!(entries[0].size, 14);
}

#[test]
fn reads_honour_the_recorded_size() {
    let storage = MemStorage::new(seeded_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    // The cluster tail beyond the recorded size is 0xFF filled; none of it
    // may leak into the read.
    let contents = volume.read_file(&root, "README.TXT").unwrap();
    assert_eq!(contents, b"hello, dassie\n");
}

#[test]
fn reading_a_directory_is_refused() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "sub").unwrap();
    assert!(matches!(
        volume.read_file(&root, "sub"),
        Err(Error::Fs(FsError::IsADirectory))
    ));
}

#[test]
fn creation_stamps_carry_a_plausible_date() {
    let storage = MemStorage::new(blank_image());
    let volume = Volume::mount(&storage).unwrap();
    let root = Location::root();

    volume.make_directory(&root, "stamped").unwrap();
    let entries = volume.entries(&root).unwrap();
    let entry = &entries[0];
    let month = (entry.modified_date >> 5) & 0x0F;
    let day = entry.modified_date & 0x1F;
    assert!((1..=12).contains(&month));
    assert!((1..=31).contains(&day));
}
