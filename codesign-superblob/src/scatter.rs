// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code directory scatter vectors.
//!
//! A scatter vector describes a non-contiguous layout of the signed pages
//! within the image. Each record maps a run of code hash slots to a run of
//! pages starting at a file offset. The vector ends with a record whose
//! `count` is 0.

use {
    crate::error::CodeSignatureError,
    scroll::Pread,
    serde::Serialize,
};

/// Size in bytes of a single scatter record.
pub const SCATTER_RECORD_SIZE: usize = 24;

/// A single scatter vector record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Pread, Serialize)]
pub struct ScatterRecord {
    /// Number of pages. 0 for sentinel only.
    pub count: u32,
    /// First page number.
    pub base: u32,
    /// Offset in target.
    pub target_offset: u64,
    /// Reserved.
    pub spare: u64,
}

impl ScatterRecord {
    /// Resolve the code slot and image offset of page `j` of this record.
    ///
    /// Returns `None` if `j` is past the end of the record.
    pub fn page(&self, j: u32, page_size: u64) -> Option<(u64, u64)> {
        if j >= self.count {
            return None;
        }

        Some((
            self.base as u64 + j as u64,
            self.target_offset
                .saturating_add((j as u64).saturating_mul(page_size)),
        ))
    }

    /// Number of leading pages of this record that start before `limit`.
    ///
    /// Never more than `count`.
    pub fn pages_before(&self, page_size: u64, limit: u64) -> u32 {
        if self.target_offset >= limit {
            return 0;
        }

        let span = limit - self.target_offset;
        let page_size = page_size.max(1);
        let needed = span / page_size + u64::from(span % page_size != 0);

        u32::try_from(needed).map_or(self.count, |n| n.min(self.count))
    }
}

/// A decoded scatter vector, sentinel excluded.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ScatterVector {
    records: Vec<ScatterRecord>,
}

impl ScatterVector {
    /// Parse a scatter vector starting at `offset` within `data`.
    ///
    /// Records are read until the `count == 0` sentinel. A record or sentinel
    /// extending past the end of `data` is an error.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, CodeSignatureError> {
        if offset > data.len() {
            return Err(CodeSignatureError::ScatterMalformed(
                "offset outside code directory",
            ));
        }

        let mut records = vec![];
        let mut position = offset;
        let offset = &mut position;

        loop {
            if data.len() - *offset < SCATTER_RECORD_SIZE {
                return Err(CodeSignatureError::ScatterMalformed(
                    "record or sentinel runs past end of data",
                ));
            }

            let record = data.gread_with::<ScatterRecord>(offset, scroll::BE)?;

            if record.count == 0 {
                break;
            }

            records.push(record);
        }

        Ok(Self { records })
    }

    pub fn records(&self) -> &[ScatterRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Total number of pages described by all records.
    pub fn page_count(&self) -> u64 {
        self.records.iter().map(|r| r.count as u64).sum()
    }

    /// Iterate over `(code slot, image offset)` for every described page
    /// starting before `limit`.
    ///
    /// Each record stops at its first page at or past `limit`, so work is
    /// bounded by the signed range and not by the declared counts.
    pub fn pages(&self, page_size: u64, limit: u64) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.records.iter().flat_map(move |r| {
            (0..r.pages_before(page_size, limit)).filter_map(move |j| r.page(j, page_size))
        })
    }
}
