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

use chrono::{Datelike, Timelike};
use dassie_ds::DataStorage;
use dassie_fs::{Entry, EntryKind, Error, FileSystem, FsError, Location, Result};
use log::{debug, error, warn};
use zerocopy::{
    little_endian::{U16, U32},
    transmute, FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout,
};

/// First cluster of the root directory. `..` entries of its children store 0
/// instead; readers substitute this value.
pub const ROOT_CLUSTER: u32 = 2;

/// FAT values at or above this terminate a cluster chain.
const END_OF_CHAIN: u32 = 0x0FFF_FFF8;
/// Only the low 28 bits of a FAT entry are meaningful.
const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;

const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_ARCHIVE: u8 = 0x20;
const ATTR_LONG_NAME: u8 = 0x0F;

const ENTRY_FREE: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;
const ENTRY_DOT: u8 = 0x2E;
const LAST_LONG_ENTRY: u8 = 0x40;

const DIR_ENTRY_SIZE: usize = 32;
/// UCS-2 characters per long-name fragment.
const LONG_NAME_CHARS: usize = 13;
const MAX_NAME_CHARS: usize = 255;
/// 20 fragments cover the 255 character name limit.
const MAX_FRAGMENTS: usize = 20;

/// A mounted FAT32 volume over positional storage. Geometry is read once
/// from the boot sector; the boot sector itself is never written back.
pub struct Volume<DS: DataStorage> {
    data_storage: DS,

    cluster_size: usize,
    fat_offset: u64,
    fat_size: u64,
    num_fats: u8,
    fat_entries: u32,
    data_offset: u64,
}

impl<DS: DataStorage> Volume<DS> {
    pub fn mount(data_storage: DS) -> Result<Self> {
        let mut boot_sector = BootSector::new_zeroed();
        data_storage.read(0, boot_sector.as_mut_bytes())?;

        let bytes_per_sector = boot_sector.bytes_per_sector.get() as u32;
        if !bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&bytes_per_sector) {
            error!("Bytes per sector ({bytes_per_sector}) shall be a power of 2 within [512, 4096]");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let sectors_per_cluster = boot_sector.sectors_per_cluster as u32;
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            error!("Sectors per cluster ({sectors_per_cluster}) shall be a power of 2 within [1, 128]");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let reserved_sectors = boot_sector.reserved_sectors.get() as u32;
        if reserved_sectors == 0 {
            error!("Reserved sector count shall not be 0");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let num_fats = boot_sector.num_fats;
        if num_fats != 1 && num_fats != 2 {
            error!("Number of FATs ({num_fats}) shall be 1 or 2");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        if boot_sector.fat_size_16.get() != 0 || boot_sector.fat_size_32.get() == 0 {
            error!("FAT size fields do not describe a FAT32 volume");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let sectors_per_fat = boot_sector.fat_size_32.get();
        let root_cluster = boot_sector.root_cluster.get();
        if root_cluster != ROOT_CLUSTER {
            warn!("Root directory cluster ({root_cluster}) is assumed to be {ROOT_CLUSTER}");
        }

        let fat_size = bytes_per_sector as u64 * sectors_per_fat as u64;
        let fat_offset = (bytes_per_sector * reserved_sectors) as u64;
        Ok(Self {
            data_storage,
            cluster_size: (bytes_per_sector * sectors_per_cluster) as usize,
            fat_offset,
            fat_size,
            num_fats,
            fat_entries: (fat_size / 4) as u32,
            data_offset: fat_offset + num_fats as u64 * fat_size,
        })
    }

    /// FAT entry at `index`, with the reserved top 4 bits masked off.
    pub fn fat_read(&self, index: u32) -> Result<u32> {
        let mut entry = U32::new(0);
        self.data_storage
            .read(self.fat_offset + index as u64 * 4, entry.as_mut_bytes())?;
        Ok(entry.get() & FAT_ENTRY_MASK)
    }

    /// Write `value` at `index` in every FAT copy. The mirror invariant is
    /// maintained here and nowhere else.
    pub fn fat_write(&self, index: u32, value: u32) -> Result<()> {
        let entry = U32::new(value);
        for copy in 0..self.num_fats as u64 {
            self.data_storage.write(
                self.fat_offset + copy * self.fat_size + index as u64 * 4,
                entry.as_bytes(),
            )?;
        }
        Ok(())
    }

    fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_offset + (cluster as u64 - 2) * self.cluster_size as u64
    }

    /// Full payload of cluster `cluster`. The buffer is allocated per call.
    pub fn cluster_read(&self, cluster: u32) -> Result<Vec<u8>> {
        let mut payload = vec![0; self.cluster_size];
        self.data_storage
            .read(self.cluster_offset(cluster), &mut payload)?;
        Ok(payload)
    }

    /// Overwrite cluster `cluster`; `payload` must be one cluster long.
    pub fn cluster_write(&self, cluster: u32, payload: &[u8]) -> Result<()> {
        debug_assert_eq!(payload.len(), self.cluster_size);
        self.data_storage
            .write(self.cluster_offset(cluster), payload)
    }

    /// Drive `visit` over the live entry groups of the directory starting at
    /// `start_cluster`, crossing cluster boundaries transparently. Long-name
    /// fragments accumulate until an 8.3 record closes the group; a free
    /// record ends the directory.
    fn walk_directory<F>(&self, start_cluster: u32, mut visit: F) -> Result<()>
    where
        F: FnMut(&EntryGroup) -> Result<Walk>,
    {
        let entries_per_cluster = self.cluster_size / DIR_ENTRY_SIZE;
        let mut fragments = FragmentBuffer::new();
        for cluster in ClusterChain(self, start_cluster) {
            let cluster = cluster?;
            let payload = self.cluster_read(cluster)?;
            for index in 0..entries_per_cluster {
                let mut record = [0; DIR_ENTRY_SIZE];
                record.copy_from_slice(&payload[index * DIR_ENTRY_SIZE..][..DIR_ENTRY_SIZE]);
                match classify(record) {
                    Slot::End => return Ok(()),
                    Slot::Deleted => fragments.clear(),
                    Slot::Dot => {}
                    Slot::Long(fragment) => fragments.push(fragment),
                    Slot::Short(short) => {
                        let group = EntryGroup {
                            fragments: fragments.as_slice(),
                            short,
                            cluster,
                            index,
                        };
                        let verdict = visit(&group)?;
                        fragments.clear();
                        if matches!(verdict, Walk::Stop) {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn find_group(&self, start_cluster: u32, name: &str) -> Result<Option<(ShortEntry, u32, usize)>> {
        let mut matched = None;
        self.walk_directory(start_cluster, |group| {
            if group.name() == name {
                matched = Some((group.short, group.cluster, group.index));
                Ok(Walk::Stop)
            } else {
                Ok(Walk::Continue)
            }
        })?;
        Ok(matched)
    }

    /// The one path walker behind both `resolve` flavors. With `touch` set,
    /// every matched 8.3 record gets its modification stamp refreshed and
    /// persisted just before descending into it.
    fn resolve_walk(&self, at: &Location, target: &str, touch: bool) -> Result<Location> {
        let mut location = if target.starts_with('/') {
            Location::root()
        } else {
            at.clone()
        };
        for segment in target.split('/').filter(|segment| !segment.is_empty()) {
            match segment {
                "." => {}
                ".." => self.ascend(&mut location)?,
                _ => self.descend(&mut location, segment, touch)?,
            }
        }
        Ok(location)
    }

    /// Step into the parent via the `..` record at slot 1 of the directory's
    /// first cluster. The root has no parent; a stored cluster of 0 stands
    /// for the root.
    fn ascend(&self, location: &mut Location) -> Result<()> {
        if location.path == "/" {
            return Ok(());
        }
        let payload = self.cluster_read(location.cluster)?;
        let mut record = [0; DIR_ENTRY_SIZE];
        record.copy_from_slice(&payload[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);
        let dot_dot: ShortEntry = transmute!(record);
        let parent = dot_dot.first_cluster();
        location.cluster = if parent == 0 { ROOT_CLUSTER } else { parent };
        match location.path.rfind('/') {
            Some(0) | None => location.path = "/".into(),
            Some(index) => location.path.truncate(index),
        }
        Ok(())
    }

    fn descend(&self, location: &mut Location, segment: &str, touch: bool) -> Result<()> {
        let Some((short, cluster, index)) = self.find_group(location.cluster, segment)? else {
            return Err(Error::Fs(FsError::NotFound));
        };
        if touch {
            self.stamp_modified(cluster, index)?;
        }
        location.cluster = short.first_cluster();
        if location.path != "/" {
            location.path.push('/');
        }
        location.path.push_str(segment);
        Ok(())
    }

    fn stamp_modified(&self, cluster: u32, index: usize) -> Result<()> {
        let (date, time) = now_timestamp();
        let mut payload = self.cluster_read(cluster)?;
        let mut record = [0; DIR_ENTRY_SIZE];
        record.copy_from_slice(&payload[index * DIR_ENTRY_SIZE..][..DIR_ENTRY_SIZE]);
        let mut short: ShortEntry = transmute!(record);
        short.modified_time.set(time);
        short.modified_date.set(date);
        payload[index * DIR_ENTRY_SIZE..][..DIR_ENTRY_SIZE].copy_from_slice(short.as_bytes());
        self.cluster_write(cluster, &payload)
    }

    /// First FAT index reading as free. Linear scan from index 0; the
    /// reserved entries 0 and 1 are never free on a valid volume.
    fn allocate_free_cluster(&self) -> Result<u32> {
        for index in 0..self.fat_entries {
            if self.fat_read(index)? == 0 {
                debug!("Allocated cluster {index}");
                return Ok(index);
            }
        }
        Err(Error::Fs(FsError::NoSpace))
    }

    /// Allocate a cluster, terminate its chain, and clear its payload so the
    /// directory terminator invariant holds when it is spliced into one.
    fn allocate_blank_cluster(&self) -> Result<u32> {
        let cluster = self.allocate_free_cluster()?;
        self.fat_write(cluster, END_OF_CHAIN)?;
        self.cluster_write(cluster, &vec![0; self.cluster_size])?;
        Ok(cluster)
    }

    fn extend_chain(&self, predecessor: u32) -> Result<u32> {
        let cluster = self.allocate_blank_cluster()?;
        self.fat_write(predecessor, cluster)?;
        Ok(cluster)
    }

    /// Locate the first free record of a directory, counting the live file
    /// groups passed on the way (the count names the new short entry).
    fn find_insertion_point(&self, start_cluster: u32) -> Result<InsertionPoint> {
        let entries_per_cluster = self.cluster_size / DIR_ENTRY_SIZE;
        let mut groups = 0;
        let mut last_cluster = start_cluster;
        for cluster in ClusterChain(self, start_cluster) {
            let cluster = cluster?;
            last_cluster = cluster;
            let payload = self.cluster_read(cluster)?;
            for index in 0..entries_per_cluster {
                let mut record = [0; DIR_ENTRY_SIZE];
                record.copy_from_slice(&payload[index * DIR_ENTRY_SIZE..][..DIR_ENTRY_SIZE]);
                match classify(record) {
                    Slot::End => return Ok(InsertionPoint { cluster, index, groups }),
                    Slot::Short(_) => groups += 1,
                    _ => {}
                }
            }
        }
        // Fully populated chain without a terminator.
        let cluster = self.extend_chain(last_cluster)?;
        Ok(InsertionPoint {
            cluster,
            index: 0,
            groups,
        })
    }

    /// Write an entry run starting at the insertion point, spilling into the
    /// next chained cluster and extending the chain on demand.
    fn write_entry_run(&self, point: &InsertionPoint, run: &[[u8; DIR_ENTRY_SIZE]]) -> Result<()> {
        let entries_per_cluster = self.cluster_size / DIR_ENTRY_SIZE;
        let mut cluster = point.cluster;
        let mut index = point.index;
        let mut payload = self.cluster_read(cluster)?;
        for record in run {
            if index == entries_per_cluster {
                self.cluster_write(cluster, &payload)?;
                let next = self.fat_read(cluster)?;
                cluster = if next >= END_OF_CHAIN {
                    self.extend_chain(cluster)?
                } else {
                    next
                };
                payload = self.cluster_read(cluster)?;
                index = 0;
            }
            payload[index * DIR_ENTRY_SIZE..][..DIR_ENTRY_SIZE].copy_from_slice(record);
            index += 1;
        }
        self.cluster_write(cluster, &payload)
    }

    /// Shared backend of `mkdir` and `touch`: verify the name is absent,
    /// splice the long-name run and 8.3 record into the parent, and restamp
    /// the parent's own entry.
    fn create_entry(&self, at: &Location, target: &str, directory: bool) -> Result<()> {
        let (parent_path, name) = split_target(target);
        if name.is_empty() || name == "." || name == ".." || name.chars().count() > MAX_NAME_CHARS {
            return Err(Error::Fs(FsError::InvalidName));
        }
        let parent = self.resolve_walk(at, parent_path, false)?;
        if self.find_group(parent.cluster, name)?.is_some() {
            return Err(Error::Fs(FsError::AlreadyExists));
        }

        let point = self.find_insertion_point(parent.cluster)?;
        let first_cluster = if directory {
            let cluster = self.allocate_blank_cluster()?;
            self.seed_directory(cluster, parent.cluster)?;
            cluster
        } else {
            0
        };
        let attributes = if directory { ATTR_DIRECTORY } else { ATTR_ARCHIVE };
        let short = new_short_entry(
            synthesize_short_name(point.groups + 1),
            attributes,
            first_cluster,
        );
        self.write_entry_run(&point, &build_entry_run(name, short))?;
        self.touch_parent(&parent)
    }

    /// Seed a fresh directory cluster with its `.` and `..` records. The
    /// parent link follows the on-disk convention: 0 stands for the root.
    fn seed_directory(&self, cluster: u32, parent_cluster: u32) -> Result<()> {
        let parent_link = if parent_cluster == ROOT_CLUSTER {
            0
        } else {
            parent_cluster
        };
        let dot = new_short_entry(*b".          ", ATTR_DIRECTORY, cluster);
        let dot_dot = new_short_entry(*b"..         ", ATTR_DIRECTORY, parent_link);
        let mut payload = vec![0; self.cluster_size];
        payload[..DIR_ENTRY_SIZE].copy_from_slice(dot.as_bytes());
        payload[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(dot_dot.as_bytes());
        self.cluster_write(cluster, &payload)
    }

    /// Re-walk the mutated directory's path from the root with the touch flag
    /// set, so its entry in the grandparent records the mutation time.
    fn touch_parent(&self, parent: &Location) -> Result<()> {
        self.resolve_walk(&Location::root(), &parent.path, true)
            .map(|_| ())
    }
}

impl<DS: DataStorage> FileSystem for Volume<DS> {
    fn resolve(&self, at: &Location, target: &str) -> Result<Location> {
        self.resolve_walk(at, target, false)
    }

    fn entries(&self, at: &Location) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        self.walk_directory(at.cluster, |group| {
            entries.push(group.entry());
            Ok(Walk::Continue)
        })?;
        Ok(entries)
    }

    fn read_file(&self, at: &Location, target: &str) -> Result<Vec<u8>> {
        let (parent_path, name) = split_target(target);
        let parent = self.resolve_walk(at, parent_path, false)?;
        let Some((short, _, _)) = self.find_group(parent.cluster, name)? else {
            return Err(Error::Fs(FsError::NotFound));
        };
        if short.is_directory() {
            return Err(Error::Fs(FsError::IsADirectory));
        }

        // The recorded size is authoritative; the chain may be longer.
        let mut remaining = short.size.get() as usize;
        let mut contents = Vec::with_capacity(remaining);
        if remaining == 0 {
            return Ok(contents);
        }
        for cluster in ClusterChain(self, short.first_cluster()) {
            let payload = self.cluster_read(cluster?)?;
            let take = remaining.min(self.cluster_size);
            contents.extend_from_slice(&payload[..take]);
            remaining -= take;
            if remaining == 0 {
                break;
            }
        }
        if remaining != 0 {
            error!("Cluster chain ends {remaining} bytes short of the recorded file size");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        Ok(contents)
    }

    fn make_directory(&self, at: &Location, target: &str) -> Result<()> {
        self.create_entry(at, target, true)
    }

    fn make_file(&self, at: &Location, target: &str) -> Result<()> {
        self.create_entry(at, target, false)
    }
}

/// Lazy walk of a FAT cluster chain; stops at an end-of-chain marker or a
/// reserved index. Cycles are not detected.
struct ClusterChain<'vol, DS: DataStorage>(&'vol Volume<DS>, u32);

impl<DS: DataStorage> Iterator for ClusterChain<'_, DS> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = self.1;
        if cluster < 2 || cluster >= END_OF_CHAIN {
            return None;
        }
        match self.0.fat_read(cluster) {
            Ok(next) => {
                self.1 = next;
                Some(Ok(cluster))
            }
            Err(error) => Some(Err(error)),
        }
    }
}

enum Walk {
    Continue,
    Stop,
}

struct InsertionPoint {
    cluster: u32,
    index: usize,
    groups: usize,
}

/// One record of the directory entry stream, discriminated by its first byte
/// and attributes. Viewing each 32-byte slot through this tagged union keeps
/// the long-name and 8.3 layouts from being confused by index arithmetic.
enum Slot {
    End,
    Deleted,
    Dot,
    Long(LongEntry),
    Short(ShortEntry),
}

fn classify(record: [u8; DIR_ENTRY_SIZE]) -> Slot {
    match record[0] {
        ENTRY_FREE => Slot::End,
        ENTRY_DELETED => Slot::Deleted,
        ENTRY_DOT => Slot::Dot,
        _ if record[11] & 0x0F == ATTR_LONG_NAME => Slot::Long(transmute!(record)),
        _ => Slot::Short(transmute!(record)),
    }
}

/// Long-name fragments of the group being decoded, in on-disk order. The
/// capacity is fixed; fragments beyond it would describe a name longer than
/// the format allows and are dropped.
struct FragmentBuffer {
    fragments: [LongEntry; MAX_FRAGMENTS],
    len: usize,
}

impl FragmentBuffer {
    fn new() -> Self {
        Self {
            fragments: [LongEntry::new_zeroed(); MAX_FRAGMENTS],
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn push(&mut self, fragment: LongEntry) {
        if self.len < MAX_FRAGMENTS {
            self.fragments[self.len] = fragment;
            self.len += 1;
        }
    }

    fn as_slice(&self) -> &[LongEntry] {
        &self.fragments[..self.len]
    }
}

/// A live file group: the long-name fragments in on-disk (reverse text)
/// order plus the 8.3 record that closed them, with the position of that
/// record for in-place updates.
struct EntryGroup<'walk> {
    fragments: &'walk [LongEntry],
    short: ShortEntry,
    cluster: u32,
    index: usize,
}

impl EntryGroup<'_> {
    fn name(&self) -> String {
        decode_name(self.fragments, &self.short)
    }

    fn entry(&self) -> Entry {
        Entry {
            name: self.name(),
            kind: if self.short.is_directory() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            first_cluster: self.short.first_cluster(),
            size: self.short.size.get(),
            modified_date: self.short.modified_date.get(),
            modified_time: self.short.modified_time.get(),
        }
    }
}

/// Reconstruct the long name: fragments are stored last-text-first, so they
/// are visited in reverse, stopping at the first terminator. A group without
/// fragments was written by a short-name-only implementation and decodes as
/// `NAME.EXT`.
fn decode_name(fragments: &[LongEntry], short: &ShortEntry) -> String {
    if fragments.is_empty() {
        return short.short_name();
    }
    let mut units = Vec::with_capacity(fragments.len() * LONG_NAME_CHARS);
    for fragment in fragments.iter().rev() {
        if !fragment.collect_units(&mut units) {
            break;
        }
    }
    String::from_utf16_lossy(&units)
}

/// FAT date and time of the current wall clock. The year is biased by 1980
/// and the seconds halved, per the on-disk encoding.
fn now_timestamp() -> (u16, u16) {
    let now = chrono::Local::now();
    let date = (((now.year() - 1980).clamp(0, 127) as u16) << 9)
        | ((now.month() as u16) << 5)
        | now.day() as u16;
    let time =
        ((now.hour() as u16) << 11) | ((now.minute() as u16) << 5) | (now.second() as u16 / 2);
    (date, time)
}

/// Split a target path into its containing path and leaf name, `.` standing
/// in for a leafless target.
fn split_target(target: &str) -> (&str, &str) {
    match target.rfind('/') {
        Some(0) => ("/", &target[1..]),
        Some(index) => (&target[..index], &target[index + 1..]),
        None => (".", target),
    }
}

/// Checksum of the 11-byte short name, carried by every fragment of the
/// accompanying long-name run.
fn short_name_checksum(name: &[u8; 11]) -> u8 {
    name.iter().fold(0u8, |sum, &byte| {
        ((sum & 1) << 7)
            .wrapping_add(sum >> 1)
            .wrapping_add(byte)
    })
}

/// Short names are synthesized as `~N` from the group's ordinal in its
/// directory. Nothing resolves by short name, so collisions after deletions
/// by other tools are harmless.
fn synthesize_short_name(ordinal: usize) -> [u8; 11] {
    let mut name = [b' '; 11];
    name[0] = b'~';
    for (slot, digit) in name[1..].iter_mut().zip(ordinal.to_string().bytes()) {
        *slot = digit;
    }
    name
}

/// UTF-16 payload of each fragment: a terminator when the name does not fill
/// the last fragment, `0xFFFF` padding after it.
fn long_name_chunks(name: &str) -> Vec<[u16; LONG_NAME_CHARS]> {
    let mut units: Vec<u16> = name.encode_utf16().collect();
    let fragments = units.len().div_ceil(LONG_NAME_CHARS);
    if units.len() < fragments * LONG_NAME_CHARS {
        units.push(0x0000);
        units.resize(fragments * LONG_NAME_CHARS, 0xFFFF);
    }
    units
        .chunks(LONG_NAME_CHARS)
        .map(|chunk| {
            let mut fragment = [0; LONG_NAME_CHARS];
            fragment.copy_from_slice(chunk);
            fragment
        })
        .collect()
}

/// Serialize the on-disk run for a new entry: fragments highest-ordinal
/// first, the terminal one marked, the 8.3 record last.
fn build_entry_run(name: &str, short: ShortEntry) -> Vec<[u8; DIR_ENTRY_SIZE]> {
    let checksum = short_name_checksum(&short.name);
    let chunks = long_name_chunks(name);
    let mut run = Vec::with_capacity(chunks.len() + 1);
    for (ordinal, chunk) in chunks.iter().enumerate().rev() {
        let mut fragment = LongEntry::new_zeroed();
        fragment.sequence = if ordinal + 1 == chunks.len() {
            LAST_LONG_ENTRY | chunks.len() as u8
        } else {
            ordinal as u8 + 1
        };
        fragment.attributes = ATTR_LONG_NAME;
        fragment.checksum = checksum;
        for (slot, &unit) in fragment
            .name1
            .iter_mut()
            .chain(fragment.name2.iter_mut())
            .chain(fragment.name3.iter_mut())
            .zip(chunk)
        {
            slot.set(unit);
        }
        run.push(transmute!(fragment));
    }
    run.push(transmute!(short));
    run
}

fn new_short_entry(name: [u8; 11], attributes: u8, first_cluster: u32) -> ShortEntry {
    let (date, time) = now_timestamp();
    let mut entry = ShortEntry::new_zeroed();
    entry.name = name;
    entry.attributes = attributes;
    entry.set_first_cluster(first_cluster);
    entry.creation_time.set(time);
    entry.creation_date.set(date);
    entry.modified_time.set(time);
    entry.modified_date.set(date);
    entry
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct BootSector {
    /// x86 jump to the bootstrap code; not interpreted.
    jump: [u8; 3],
    /// Identifier of the formatting system; not interpreted.
    oem_name: [u8; 8],

    /// Count of bytes per sector: 512, 1024, 2048 or 4096.
    bytes_per_sector: U16,
    /// Sectors per allocation unit; a power of 2 up to 128.
    sectors_per_cluster: u8,
    /// Sectors preceding the first FAT, the boot sector included. Never 0.
    reserved_sectors: U16,
    /// Count of FAT copies; 2 is recommended, 1 is acceptable. Every FAT
    /// write is mirrored across all copies.
    num_fats: u8,
    /// FAT12/FAT16 root directory entry count; 0 on FAT32.
    root_entries: U16,
    /// 16-bit total sector count; 0 on FAT32.
    total_sectors_16: U16,
    /// Media descriptor; 0xF8 for fixed media.
    media: u8,
    /// FAT12/FAT16 sectors per FAT; must be 0 on FAT32, where the 32-bit
    /// field below holds the size.
    fat_size_16: U16,

    /// CHS geometry for interrupt 0x13; irrelevant to images.
    sectors_per_track: U16,
    /// See `sectors_per_track`.
    num_heads: U16,
    /// Sectors preceding the partition; 0 on unpartitioned media.
    hidden_sectors: U32,

    /// 32-bit total sector count, covering all four volume regions.
    total_sectors_32: U32,

    /// FAT32 sectors per FAT.
    fat_size_32: U32,
    /// Mirroring policy flags. Bit 7 clear means the FAT is mirrored at
    /// runtime into all copies, which is the behavior implemented here.
    ext_flags: U16,
    /// FAT32 version, 0.
    fs_version: U16,
    /// First cluster of the root directory, normally 2.
    root_cluster: U32,
    /// Sector of the FSINFO structure, usually 1.
    fs_info_sector: U16,
    /// Sector of the backup boot record, 0 or 6.
    backup_boot_sector: U16,
    reserved: [u8; 12],

    /// Interrupt 0x13 drive number.
    drive_number: u8,
    reserved_1: u8,
    /// 0x29 when the volume id, label and type fields below are present.
    boot_signature: u8,
    /// Volume serial number, derived from the formatting date and time.
    volume_id: U32,
    /// Volume label, mirroring the volume-label entry of the root directory.
    volume_label: [u8; 11],
    /// Informational "FAT32   " string; does not determine the FAT type.
    fs_type: [u8; 8],

    boot_code: [u8; 420],
    /// 0x55 0xAA.
    signature_word: [u8; 2],
}

/// The 8.3 variant of the 32-byte directory record, selected when the low
/// attribute nibble is not the long-name marker.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct ShortEntry {
    /// Space-padded short name, 8 base bytes then 3 extension bytes.
    name: [u8; 11],
    /// 0x10 marks a directory, 0x20 a regular file.
    attributes: u8,
    reserved: u8,
    /// Sub-second part of the creation time, in 10ms units.
    creation_time_tenths: u8,
    creation_time: U16,
    creation_date: U16,
    access_date: U16,
    /// High half of the first data cluster; FAT32 only.
    first_cluster_high: U16,
    modified_time: U16,
    modified_date: U16,
    /// Low half of the first data cluster.
    first_cluster_low: U16,
    /// File size in bytes; 0 for directories.
    size: U32,
}

impl ShortEntry {
    fn first_cluster(&self) -> u32 {
        (self.first_cluster_high.get() as u32) << 16 | self.first_cluster_low.get() as u32
    }

    fn set_first_cluster(&mut self, cluster: u32) {
        self.first_cluster_high.set((cluster >> 16) as u16);
        self.first_cluster_low.set(cluster as u16);
    }

    fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    fn short_name(&self) -> String {
        let base = String::from_utf8_lossy(&self.name[..8]);
        let base = base.trim_end_matches(' ');
        let extension = String::from_utf8_lossy(&self.name[8..]);
        let extension = extension.trim_end_matches(' ');
        if extension.is_empty() {
            base.into()
        } else {
            format!("{base}.{extension}")
        }
    }
}

/// The long-name variant, carrying up to 13 UCS-2 characters of the name.
/// Runs are stored in reverse text order; the first record on disk has the
/// terminal marker in its sequence byte.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct LongEntry {
    /// Ordinal of this fragment counted from the 8.3 record backwards, with
    /// 0x40 set on the terminal (first on disk) fragment.
    sequence: u8,
    /// Characters 1-5.
    name1: [U16; 5],
    /// Always 0x0F.
    attributes: u8,
    reserved: u8,
    /// Checksum of the short name in the 8.3 record closing the run.
    checksum: u8,
    /// Characters 6-11.
    name2: [U16; 6],
    /// Always 0.
    first_cluster: U16,
    /// Characters 12-13.
    name3: [U16; 2],
}

impl LongEntry {
    /// Append this fragment's characters to `units`; false once the
    /// terminator or padding is reached.
    fn collect_units(&self, units: &mut Vec<u16>) -> bool {
        for unit in self.name1.iter().chain(&self.name2).chain(&self.name3) {
            let unit = unit.get();
            if unit == 0x0000 || unit == 0xFFFF {
                return false;
            }
            units.push(unit);
        }
        true
    }
}
