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

pub use dassie_err::*;

/// A resolved position within the volume: the first cluster of a directory
/// together with its canonical absolute path. The pair is what the shell
/// tracks as the current working directory and what the resolver returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub cluster: u32,
    pub path: String,
}

impl Location {
    pub fn root() -> Self {
        Self {
            cluster: 2,
            path: "/".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// A decoded directory entry as handed to the shell: the reconstructed long
/// name plus the metadata `ls -l` renders. Timestamps stay in their on-disk
/// encoding; presentation is the consumer's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub first_cluster: u32,
    pub size: u32,
    pub modified_date: u16,
    pub modified_time: u16,
}

impl Entry {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// The command surface the shell drives. `target` arguments are absolute or
/// relative paths with `.` and `..` components; `at` is the currently
/// resolved directory they are interpreted against.
pub trait FileSystem {
    /// Walk `target` from `at` and return the resolved location.
    fn resolve(&self, at: &Location, target: &str) -> Result<Location>;

    /// Decode every live entry of the directory at `at`.
    fn entries(&self, at: &Location) -> Result<Vec<Entry>>;

    /// Read a whole file addressed by `target`.
    fn read_file(&self, at: &Location, target: &str) -> Result<Vec<u8>>;

    /// Create an empty directory addressed by `target`.
    fn make_directory(&self, at: &Location, target: &str) -> Result<()>;

    /// Create an empty file addressed by `target`.
    fn make_file(&self, at: &Location, target: &str) -> Result<()>;
}
