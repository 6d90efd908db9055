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

use std::cell::RefCell;

use dassie_ds::{DataStorage, Error, Result};

/// Volume image held in memory. Out-of-range accesses fail with the same
/// `UnexpectedEof` the file storage produces, so tests see the real error
/// paths.
pub struct MemStorage {
    data: RefCell<Vec<u8>>,
}

impl MemStorage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RefCell::new(data),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner()
    }

    /// Snapshot of a byte range, for asserting on raw on-disk state.
    pub fn snapshot(&self, offset: usize, len: usize) -> Vec<u8> {
        self.data.borrow()[offset..offset + len].to_vec()
    }
}

impl DataStorage for MemStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let data = self.data.borrow();
        let offset = offset as usize;
        let end = offset
            .checked_add(buffer.len())
            .filter(|&end| end <= data.len())
            .ok_or_else(|| Error::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        buffer.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        let mut data = self.data.borrow_mut();
        let offset = offset as usize;
        let end = offset
            .checked_add(buffer.len())
            .filter(|&end| end <= data.len())
            .ok_or_else(|| Error::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        data[offset..end].copy_from_slice(buffer);
        Ok(())
    }
}
