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

use std::{fs::OpenOptions, os::unix::fs::FileExt};

use dassie_ds::{DataStorage, Result};
use log::debug;

/// Disk image opened read/write for the lifetime of the process. The volume
/// is the only writer; concurrent mounts of the same image are not supported.
pub struct FileStorage {
    file: std::fs::File,
}

impl FileStorage {
    pub fn open(file_path: &str) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(file_path)?;
        let length = file.metadata()?.len();
        debug!("Opened image {file_path} ({length} bytes)");
        Ok(Self { file })
    }
}

impl DataStorage for FileStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buffer, offset)?;
        Ok(())
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        self.file.write_all_at(buffer, offset)?;
        Ok(())
    }
}
