// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code directory data structure and related types.

use {
    crate::{
        embedded_signature::{
            read_and_validate_blob_header, Blob, CodeSigningMagic, CodeSigningSlot, Digest,
            DigestType,
        },
        error::CodeSignatureError,
        scatter::ScatterVector,
    },
    log::warn,
    scroll::Pread,
    std::{borrow::Cow, collections::BTreeMap},
};

bitflags::bitflags! {
    /// Code signature flags.
    ///
    /// These flags are embedded in the Code Directory and govern use of the embedded
    /// signature.
    pub struct CodeSignatureFlags: u32 {
        /// Code may act as a host that controls and supervises guest code.
        const HOST = 0x0001;
        /// The code has been sealed without a signing identity.
        const ADHOC = 0x0002;
        /// Set the "hard" status bit for the code when it starts running.
        const FORCE_HARD = 0x0100;
        /// Implicitly set the "kill" status bit for the code when it starts running.
        const FORCE_KILL = 0x0200;
        /// Force certificate expiration checks.
        const FORCE_EXPIRATION = 0x0400;
        /// Restrict dyld loading.
        const RESTRICT = 0x0800;
        /// Enforce code signing.
        const ENFORCEMENT = 0x1000;
        /// Library validation required.
        const LIBRARY_VALIDATION = 0x2000;
        /// Apply runtime hardening policies.
        const RUNTIME = 0x10000;
        /// The code was automatically signed by the linker.
        const LINKER_SIGNED = 0x20000;
    }
}

bitflags::bitflags! {
    /// Flags that influence behavior of executable segment.
    pub struct ExecutableSegmentFlags: u64 {
        /// Executable segment belongs to main binary.
        const MAIN_BINARY = 0x0001;
        /// Allow unsigned pages (for debugging).
        const ALLOW_UNSIGNED = 0x0010;
        /// Main binary is debugger.
        const DEBUGGER = 0x0020;
        /// JIT enabled.
        const JIT = 0x0040;
        /// Skip library validation (obsolete).
        const SKIP_LIBRARY_VALIDATION = 0x0080;
        /// Can bless code directory hash for execution.
        const CAN_LOAD_CD_HASH = 0x0100;
        /// Can execute blessed code directory hash.
        const CAN_EXEC_CD_HASH = 0x0200;
    }
}

/// Version of Code Directory data structure.
///
/// Each version adds a group of fields after the previous one.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u32)]
pub enum CodeDirectoryVersion {
    Initial = 0x20000,
    SupportsScatter = 0x20100,
    SupportsTeamId = 0x20200,
    SupportsCodeLimit64 = 0x20300,
    SupportsExecutableSegment = 0x20400,
    SupportsRuntime = 0x20500,
    SupportsLinkage = 0x20600,
}

impl CodeDirectoryVersion {
    /// The newest version whose fields are understood.
    pub const NEWEST: Self = Self::SupportsLinkage;
}

/// The executable segment described by a code directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecutableSegment {
    pub base: u64,
    pub limit: u64,
    pub flags: ExecutableSegmentFlags,
}

fn get_hashes(data: &[u8], offset: usize, count: usize, hash_size: usize) -> Vec<Digest<'_>> {
    data[offset..offset + (count * hash_size)]
        .chunks(hash_size)
        .map(|data| Digest { data: data.into() })
        .collect()
}

/// Read a NUL terminated UTF-8 string at `offset`.
fn read_c_str(data: &[u8], offset: u32) -> Option<&str> {
    let data = data.get(offset as usize..)?;
    let end = data.iter().position(|b| *b == 0)?;

    std::str::from_utf8(&data[0..end]).ok()
}

/// Represents a code directory blob entry.
///
/// This struct is versioned and has been extended over time.
///
/// The struct here represents a superset of all fields in all versions.
///
/// The parser will set `Option<T>` fields to `None` for instances
/// where the version is lower than the version that field was introduced in.
/// Offset fields within a supported version are kept as stored, so a
/// `Some(0)` offset means the version has the field but it is unused.
#[derive(Debug)]
pub struct CodeDirectoryBlob<'a> {
    data: &'a [u8],

    /// Compatibility version.
    pub version: u32,
    /// Setup and mode flags.
    pub flags: CodeSignatureFlags,
    /// Offset of hash slot element at index zero.
    pub hash_offset: u32,
    /// Offset of identifier string.
    pub ident_offset: u32,
    /// Number of special hash slots.
    pub n_special_slots: u32,
    /// Number of ordinary code hash slots.
    pub n_code_slots: u32,
    /// Limit to main image signature range.
    ///
    /// This is the file-level offset to stop digesting code data at.
    pub code_limit: u32,
    /// Size of each hash in bytes.
    pub hash_size: u8,
    /// Type of hash.
    pub hash_type: DigestType,
    /// Platform identifier. 0 if not platform binary.
    pub platform: u8,
    /// log2(page size in bytes). 0 means the image is a single page.
    pub page_size_log2: u8,
    /// Unused (must be 0).
    pub spare2: u32,
    // Version 0x20100
    /// Offset of optional scatter vector.
    pub scatter_offset: Option<u32>,
    // Version 0x20200
    /// Offset of optional team identifier.
    pub team_offset: Option<u32>,
    // Version 0x20300
    /// Unused (must be 0).
    pub spare3: Option<u32>,
    /// Limit to main image signature range, 64 bits.
    pub code_limit_64: Option<u64>,
    // Version 0x20400
    /// Offset of executable segment.
    pub exec_seg_base: Option<u64>,
    /// Limit of executable segment.
    pub exec_seg_limit: Option<u64>,
    /// Executable segment flags.
    pub exec_seg_flags: Option<ExecutableSegmentFlags>,
    // Version 0x20500
    pub runtime: Option<u32>,
    pub pre_encrypt_offset: Option<u32>,
    // Version 0x20600
    pub linkage_hash_type: Option<u8>,
    pub linkage_truncated: Option<u8>,
    pub spare4: Option<u16>,
    pub linkage_offset: Option<u32>,
    pub linkage_size: Option<u32>,

    // End of blob header data / start of derived data.
    pub ident: Cow<'a, str>,
    pub team_name: Option<Cow<'a, str>>,
    pub code_hashes: Vec<Digest<'a>>,
    pub special_hashes: BTreeMap<CodeSigningSlot, Digest<'a>>,
    scatter: Option<ScatterVector>,
}

impl<'a> Blob<'a> for CodeDirectoryBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::CodeDirectory)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError> {
        // Everything below reads from the blob bounded to its declared length.
        let data = read_and_validate_blob_header(data, Self::magic(), "code directory blob")?;

        let offset = &mut 8;

        let version = data.gread_with::<u32>(offset, scroll::BE)?;
        let flags = data.gread_with::<u32>(offset, scroll::BE)?;
        let flags = CodeSignatureFlags::from_bits_truncate(flags);
        let hash_offset = data.gread_with::<u32>(offset, scroll::BE)?;
        let ident_offset = data.gread_with::<u32>(offset, scroll::BE)?;
        let n_special_slots = data.gread_with::<u32>(offset, scroll::BE)?;
        let n_code_slots = data.gread_with::<u32>(offset, scroll::BE)?;
        let code_limit = data.gread_with(offset, scroll::BE)?;
        let hash_size = data.gread_with::<u8>(offset, scroll::BE)?;
        let hash_type = DigestType::from(data.gread_with::<u8>(offset, scroll::BE)?);
        let platform = data.gread_with(offset, scroll::BE)?;
        let page_size_log2 = data.gread_with::<u8>(offset, scroll::BE)?;
        let spare2 = data.gread_with(offset, scroll::BE)?;

        let scatter_offset = if version >= CodeDirectoryVersion::SupportsScatter as u32 {
            Some(data.gread_with::<u32>(offset, scroll::BE)?)
        } else {
            None
        };
        let team_offset = if version >= CodeDirectoryVersion::SupportsTeamId as u32 {
            Some(data.gread_with::<u32>(offset, scroll::BE)?)
        } else {
            None
        };

        let (spare3, code_limit_64) = if version >= CodeDirectoryVersion::SupportsCodeLimit64 as u32
        {
            (
                Some(data.gread_with(offset, scroll::BE)?),
                Some(data.gread_with(offset, scroll::BE)?),
            )
        } else {
            (None, None)
        };

        let (exec_seg_base, exec_seg_limit, exec_seg_flags) =
            if version >= CodeDirectoryVersion::SupportsExecutableSegment as u32 {
                (
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with::<u64>(offset, scroll::BE)?),
                )
            } else {
                (None, None, None)
            };

        let exec_seg_flags = exec_seg_flags.map(ExecutableSegmentFlags::from_bits_truncate);

        let (runtime, pre_encrypt_offset) =
            if version >= CodeDirectoryVersion::SupportsRuntime as u32 {
                (
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                )
            } else {
                (None, None)
            };

        let (linkage_hash_type, linkage_truncated, spare4, linkage_offset, linkage_size) =
            if version >= CodeDirectoryVersion::SupportsLinkage as u32 {
                (
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                    Some(data.gread_with(offset, scroll::BE)?),
                )
            } else {
                (None, None, None, None, None)
            };

        if version > CodeDirectoryVersion::NEWEST as u32 {
            warn!(
                "code directory version 0x{:x} is newer than 0x{:x}; ignoring unknown fields",
                version,
                CodeDirectoryVersion::NEWEST as u32
            );
        }

        if page_size_log2 >= 32 {
            return Err(CodeSignatureError::CodeDirectoryMalformed("page size"));
        }

        let expected = hash_type.hash_len()?;
        if hash_size as usize != expected {
            return Err(CodeSignatureError::CodeDirectoryHashSizeMismatch {
                hash_type,
                hash_size,
                expected,
            });
        }

        let start = hash_offset as i64 - hash_size as i64 * n_special_slots as i64;
        let end = hash_offset as i64 + hash_size as i64 * n_code_slots as i64;
        if start < 0 || end > data.len() as i64 {
            return Err(CodeSignatureError::CodeDirectoryHashSpanOutOfBounds {
                start,
                end,
                length: data.len() as u32,
            });
        }

        let ident = Cow::from(
            read_c_str(data, ident_offset)
                .ok_or(CodeSignatureError::CodeDirectoryMalformedIdentifier)?,
        );

        let team_name = match team_offset {
            Some(team_offset) if team_offset != 0 => Some(Cow::from(
                read_c_str(data, team_offset).ok_or(CodeSignatureError::CodeDirectoryMalformedTeam)?,
            )),
            _ => None,
        };

        let scatter = match scatter_offset {
            Some(scatter_offset) if scatter_offset != 0 => {
                Some(ScatterVector::parse(data, scatter_offset as usize)?)
            }
            _ => None,
        };

        let code_hashes = get_hashes(
            data,
            hash_offset as usize,
            n_code_slots as usize,
            hash_size as usize,
        );

        // Special slot -k lives k digests before the hash offset, so they are
        // stored from the highest slot down.
        let special_hashes = get_hashes(
            data,
            start as usize,
            n_special_slots as usize,
            hash_size as usize,
        )
        .into_iter()
        .enumerate()
        .map(|(i, h)| (CodeSigningSlot::from(n_special_slots - i as u32), h))
        .collect();

        Ok(Self {
            data,
            version,
            flags,
            hash_offset,
            ident_offset,
            n_special_slots,
            n_code_slots,
            code_limit,
            hash_size,
            hash_type,
            platform,
            page_size_log2,
            spare2,
            scatter_offset,
            team_offset,
            spare3,
            code_limit_64,
            exec_seg_base,
            exec_seg_limit,
            exec_seg_flags,
            runtime,
            pre_encrypt_offset,
            linkage_hash_type,
            linkage_truncated,
            spare4,
            linkage_offset,
            linkage_size,
            ident,
            team_name,
            code_hashes,
            special_hashes,
            scatter,
        })
    }

    fn blob_bytes(&self) -> &'a [u8] {
        self.data
    }
}

// There are other impl blocks for this structure in other modules.
impl<'a> CodeDirectoryBlob<'a> {
    /// The signing identifier.
    pub fn identifier(&self) -> &str {
        &self.ident
    }

    /// The team identifier, if the version supports one and it is set.
    pub fn team_identifier(&self) -> Option<&str> {
        self.team_name.as_deref()
    }

    /// Whether the version is newer than any version whose layout is known.
    ///
    /// Known fields are still decoded. Trailing header data is ignored.
    pub fn has_unknown_version(&self) -> bool {
        self.version > CodeDirectoryVersion::NEWEST as u32
    }

    /// Fail with an unsupported version error if [Self::has_unknown_version].
    pub fn ensure_known_version(&self) -> Result<(), CodeSignatureError> {
        if self.has_unknown_version() {
            Err(CodeSignatureError::CodeDirectoryUnsupportedVersion(
                self.version,
            ))
        } else {
            Ok(())
        }
    }

    /// The executable segment, if the version describes one.
    pub fn executable_segment(&self) -> Option<ExecutableSegment> {
        match (self.exec_seg_base, self.exec_seg_limit, self.exec_seg_flags) {
            (Some(base), Some(limit), Some(flags)) => Some(ExecutableSegment { base, limit, flags }),
            _ => None,
        }
    }

    /// The end of the signed code range.
    ///
    /// The 64-bit limit wins when the version has it and it is non-zero.
    pub fn effective_code_limit(&self) -> u64 {
        match self.code_limit_64 {
            Some(limit) if limit != 0 => limit,
            _ => self.code_limit as u64,
        }
    }

    /// Page size in bytes.
    ///
    /// `None` means the whole signed range is digested as a single page.
    pub fn page_size(&self) -> Option<u32> {
        if self.page_size_log2 == 0 {
            None
        } else {
            Some(1u32 << self.page_size_log2)
        }
    }

    /// Resolve a hash slot by its signed index.
    ///
    /// Non-negative indices are code pages. Negative index `-k` is special
    /// slot `k`.
    pub fn hash_slot(&self, index: i64) -> Option<&Digest<'a>> {
        if index >= 0 {
            self.code_hashes.get(usize::try_from(index).ok()?)
        } else {
            let slot = u32::try_from(index.checked_neg()?).ok()?;
            self.special_hashes.get(&CodeSigningSlot::from(slot))
        }
    }

    /// Obtain the stored digest for a special slot.
    pub fn special_slot_digest(&self, slot: CodeSigningSlot) -> Option<&Digest<'a>> {
        self.special_hashes.get(&slot)
    }

    /// The decoded scatter vector, if the version supports one and it is set.
    pub fn scatter_vector(&self) -> Option<&ScatterVector> {
        self.scatter.as_ref()
    }
}
