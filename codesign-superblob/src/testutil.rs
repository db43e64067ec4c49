// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic signature data for tests.

use {
    crate::{
        code_hash::paged_digests,
        embedded_signature::{CodeSigningMagic, CodeSigningSlot, DigestType},
    },
    scroll::IOwrite,
};

fn put_u32(dest: &mut Vec<u8>, v: u32) {
    dest.iowrite_with(v, scroll::BE).unwrap();
}

fn put_u64(dest: &mut Vec<u8>, v: u64) {
    dest.iowrite_with(v, scroll::BE).unwrap();
}

/// A generic blob with the given magic and payload.
pub(crate) fn generic_blob(magic: u32, payload: &[u8]) -> Vec<u8> {
    let mut res = vec![];
    put_u32(&mut res, magic);
    put_u32(&mut res, (8 + payload.len()) as u32);
    res.extend_from_slice(payload);
    res
}

pub(crate) fn entitlements_blob(plist: &str) -> Vec<u8> {
    generic_blob(CodeSigningMagic::Entitlements.into(), plist.as_bytes())
}

pub(crate) fn blob_wrapper(payload: &[u8]) -> Vec<u8> {
    generic_blob(CodeSigningMagic::BlobWrapper.into(), payload)
}

pub(crate) fn requirement_blob(expression: &[u8]) -> Vec<u8> {
    generic_blob(CodeSigningMagic::Requirement.into(), expression)
}

/// A requirements set with nested blobs laid out in table order.
pub(crate) fn requirement_set(entries: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let table_end = 12 + 8 * entries.len();
    let length = table_end + entries.iter().map(|(_, b)| b.len()).sum::<usize>();

    let mut res = vec![];
    put_u32(&mut res, CodeSigningMagic::RequirementSet.into());
    put_u32(&mut res, length as u32);
    put_u32(&mut res, entries.len() as u32);

    let mut offset = table_end;
    for (typ, blob) in entries {
        put_u32(&mut res, *typ);
        put_u32(&mut res, offset as u32);
        offset += blob.len();
    }
    for (_, blob) in entries {
        res.extend_from_slice(blob);
    }

    res
}

pub(crate) fn empty_requirement_set() -> Vec<u8> {
    requirement_set(&[])
}

/// A `SuperBlob` whose blobs follow the index in the given order.
pub(crate) fn superblob(magic: CodeSigningMagic, blobs: &[(CodeSigningSlot, Vec<u8>)]) -> Vec<u8> {
    let index_end = 12 + 8 * blobs.len();
    let length = index_end + blobs.iter().map(|(_, b)| b.len()).sum::<usize>();

    let mut res = vec![];
    put_u32(&mut res, magic.into());
    put_u32(&mut res, length as u32);
    put_u32(&mut res, blobs.len() as u32);

    let mut offset = index_end;
    for (slot, blob) in blobs {
        put_u32(&mut res, (*slot).into());
        put_u32(&mut res, offset as u32);
        offset += blob.len();
    }
    for (_, blob) in blobs {
        res.extend_from_slice(blob);
    }

    res
}

/// Size of the code directory header through the groups of a version.
fn header_size(version: u32) -> usize {
    let mut size = 0x2c;
    for (threshold, group) in [
        (0x20100, 4),
        (0x20200, 4),
        (0x20300, 12),
        (0x20400, 24),
        (0x20500, 8),
        (0x20600, 12),
    ] {
        if version >= threshold {
            size += group;
        }
    }

    size
}

/// Describes a code directory to serialize.
pub(crate) struct CodeDirectoryFixture {
    pub version: u32,
    pub flags: u32,
    pub hash_type: u8,
    pub hash_size: u8,
    pub platform: u8,
    pub page_size_log2: u8,
    pub code_limit: u32,
    pub code_limit_64: u64,
    /// Base, limit, flags.
    pub exec_seg: (u64, u64, u64),
    pub runtime: u32,
    /// Hash type, truncated, offset, size.
    pub linkage: (u8, u8, u32, u32),
    /// Header bytes past the newest known group.
    pub extra_header: Vec<u8>,
    /// Bytes between the header and the identifier.
    pub padding: Vec<u8>,
    pub identifier: String,
    pub team: Option<String>,
    /// Count, base, target offset.
    pub scatter: Option<Vec<(u32, u32, u64)>>,
    /// Element `k - 1` holds the digest of special slot `-k`.
    pub special_hashes: Vec<Vec<u8>>,
    pub code_hashes: Vec<Vec<u8>>,
}

impl CodeDirectoryFixture {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            flags: 0,
            hash_type: DigestType::Sha256.into(),
            hash_size: 32,
            platform: 0,
            page_size_log2: 12,
            code_limit: 0,
            code_limit_64: 0,
            exec_seg: (0, 0, 0),
            runtime: 0,
            linkage: (0, 0, 0, 0),
            extra_header: vec![],
            padding: vec![],
            identifier: "com.example.app".into(),
            team: None,
            scatter: None,
            special_hashes: vec![],
            code_hashes: vec![],
        }
    }

    /// A version 0x20400 directory with correct digests of `image`'s pages.
    pub fn paged(image: &[u8], hash_type: DigestType, page_size_log2: u8) -> Self {
        let page_size = if page_size_log2 == 0 {
            None
        } else {
            Some(1usize << page_size_log2)
        };

        let mut res = Self::new(0x20400);
        res.hash_type = hash_type.into();
        res.hash_size = hash_type.hash_len().unwrap() as u8;
        res.page_size_log2 = page_size_log2;
        res.code_limit = image.len() as u32;
        res.code_hashes = paged_digests(image, hash_type, page_size).unwrap();
        res
    }

    pub fn sha256_pages(image: &[u8], page_size_log2: u8) -> Self {
        Self::paged(image, DigestType::Sha256, page_size_log2)
    }

    /// Record a digest for a special slot, padding lower slots with zeros.
    pub fn set_special(&mut self, slot: CodeSigningSlot, digest: Vec<u8>) {
        let index = u32::from(slot) as usize;
        while self.special_hashes.len() < index {
            self.special_hashes.push(vec![0u8; self.hash_size as usize]);
        }
        self.special_hashes[index - 1] = digest;
    }

    pub fn build(&self) -> Vec<u8> {
        let header_len = header_size(self.version) + self.extra_header.len();

        let mut body = vec![];
        body.extend_from_slice(&self.padding);

        let ident_offset = header_len + body.len();
        body.extend_from_slice(self.identifier.as_bytes());
        body.push(0);

        let team_offset = match &self.team {
            Some(team) if self.version >= 0x20200 => {
                let offset = header_len + body.len();
                body.extend_from_slice(team.as_bytes());
                body.push(0);
                offset
            }
            _ => 0,
        };

        let scatter_offset = match &self.scatter {
            Some(records) if self.version >= 0x20100 => {
                let offset = header_len + body.len();
                for (count, base, target_offset) in records {
                    put_u32(&mut body, *count);
                    put_u32(&mut body, *base);
                    put_u64(&mut body, *target_offset);
                    put_u64(&mut body, 0);
                }
                body.extend_from_slice(&[0u8; 24]);
                offset
            }
            _ => 0,
        };

        for digest in self.special_hashes.iter().rev() {
            body.extend_from_slice(digest);
        }

        let hash_offset = header_len + body.len();
        for digest in &self.code_hashes {
            body.extend_from_slice(digest);
        }

        let length = header_len + body.len();

        let mut res = vec![];
        put_u32(&mut res, CodeSigningMagic::CodeDirectory.into());
        put_u32(&mut res, length as u32);
        put_u32(&mut res, self.version);
        put_u32(&mut res, self.flags);
        put_u32(&mut res, hash_offset as u32);
        put_u32(&mut res, ident_offset as u32);
        put_u32(&mut res, self.special_hashes.len() as u32);
        put_u32(&mut res, self.code_hashes.len() as u32);
        put_u32(&mut res, self.code_limit);
        res.push(self.hash_size);
        res.push(self.hash_type);
        res.push(self.platform);
        res.push(self.page_size_log2);
        put_u32(&mut res, 0);

        if self.version >= 0x20100 {
            put_u32(&mut res, scatter_offset as u32);
        }
        if self.version >= 0x20200 {
            put_u32(&mut res, team_offset as u32);
        }
        if self.version >= 0x20300 {
            put_u32(&mut res, 0);
            put_u64(&mut res, self.code_limit_64);
        }
        if self.version >= 0x20400 {
            put_u64(&mut res, self.exec_seg.0);
            put_u64(&mut res, self.exec_seg.1);
            put_u64(&mut res, self.exec_seg.2);
        }
        if self.version >= 0x20500 {
            put_u32(&mut res, self.runtime);
            put_u32(&mut res, 0);
        }
        if self.version >= 0x20600 {
            res.push(self.linkage.0);
            res.push(self.linkage.1);
            res.iowrite_with(0u16, scroll::BE).unwrap();
            put_u32(&mut res, self.linkage.2);
            put_u32(&mut res, self.linkage.3);
        }
        res.extend_from_slice(&self.extra_header);
        assert_eq!(res.len(), header_len);

        res.extend_from_slice(&body);
        res
    }
}

/// Deterministic, non-repeating image bytes.
pub(crate) fn image_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
