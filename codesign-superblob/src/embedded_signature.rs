// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common embedded signature data structures (superblobs, magic values, etc).
//!
//! This module defines types and data structures that are common to Apple's
//! embedded signature format.
//!
//! Within this module are constants for header magic, slot types, digest
//! types, the generic *blob* framing and the `SuperBlob` index decoder.
//!
//! There is no official specification of the Mach-O structure for various
//! code signing primitives. The best source comes from Apple's open source
//! headers, notably `cs_blobs.h` in xnu.
//!
//! The high-level format of embedded signature data is roughly as follows:
//!
//! * A `SuperBlob` header describes the total length of data and the number of
//!   *blob* sections that follow.
//! * An array of `BlobIndex` describing the type and offset of all *blob* sections
//!   that follow. The *type* here is a *slot* and describes what type of data the
//!   *blob* contains (code directory, entitlements, CMS signature, etc).
//! * N *blob* sections of varying formats and lengths, in no particular order.
//!
//! The [EmbeddedSignature] type represents a lightly parsed `SuperBlob`. It
//! provides access to [BlobEntry] which describe the *blob* sections within the
//! super blob. A [BlobEntry] can be parsed into the more concrete [ParsedBlob],
//! which allows some access to data within each specific blob type.
//!
//! Every index entry is resolved independently. A malformed entry never
//! prevents its siblings from being decoded.

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        code_requirement::{RequirementBlob, RequirementSetBlob},
        error::CodeSignatureError,
    },
    log::debug,
    scroll::{IOwrite, Pread},
    serde::{Serialize, Serializer},
    std::{
        borrow::Cow,
        cmp::Ordering,
        fmt::{Display, Formatter},
    },
};

/// Size in bytes of the `SuperBlob` header (magic, length, count).
pub const SUPERBLOB_HEADER_SIZE: usize = 12;

/// Size in bytes of a single `BlobIndex` record.
pub const BLOB_INDEX_SIZE: usize = 8;

/// Size in bytes of the generic blob header (magic, length).
pub const BLOB_HEADER_SIZE: usize = 8;

/// Defines header magic for various payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSigningMagic {
    /// Code requirement blob.
    Requirement,
    /// Code requirements blob.
    RequirementSet,
    /// CodeDirectory blob.
    CodeDirectory,
    /// Embedded signature.
    ///
    /// This is often the magic of the SuperBlob.
    EmbeddedSignature,
    /// Old embedded signature.
    EmbeddedSignatureOld,
    /// Entitlements blob.
    Entitlements,
    /// DER encoded entitlements blob.
    EntitlementsDer,
    /// Multi-arch collection of embedded signatures.
    DetachedSignature,
    /// Generic blob wrapper.
    ///
    /// The CMS signature is stored in this type.
    BlobWrapper,
    /// Unknown magic.
    Unknown(u32),
}

impl From<u32> for CodeSigningMagic {
    fn from(v: u32) -> Self {
        match v {
            0xfade0c00 => Self::Requirement,
            0xfade0c01 => Self::RequirementSet,
            0xfade0c02 => Self::CodeDirectory,
            0xfade0cc0 => Self::EmbeddedSignature,
            0xfade0b02 => Self::EmbeddedSignatureOld,
            0xfade7171 => Self::Entitlements,
            0xfade7172 => Self::EntitlementsDer,
            0xfade0cc1 => Self::DetachedSignature,
            0xfade0b01 => Self::BlobWrapper,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningMagic> for u32 {
    fn from(magic: CodeSigningMagic) -> u32 {
        match magic {
            CodeSigningMagic::Requirement => 0xfade0c00,
            CodeSigningMagic::RequirementSet => 0xfade0c01,
            CodeSigningMagic::CodeDirectory => 0xfade0c02,
            CodeSigningMagic::EmbeddedSignature => 0xfade0cc0,
            CodeSigningMagic::EmbeddedSignatureOld => 0xfade0b02,
            CodeSigningMagic::Entitlements => 0xfade7171,
            CodeSigningMagic::EntitlementsDer => 0xfade7172,
            CodeSigningMagic::DetachedSignature => 0xfade0cc1,
            CodeSigningMagic::BlobWrapper => 0xfade0b01,
            CodeSigningMagic::Unknown(v) => v,
        }
    }
}

impl CodeSigningMagic {
    /// Human readable name of this magic.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Requirement => "Requirement",
            Self::RequirementSet => "Requirements",
            Self::CodeDirectory => "Code Directory",
            Self::EmbeddedSignature => "Embedded Signature",
            Self::EmbeddedSignatureOld => "Embedded Signature (Old)",
            Self::Entitlements => "Embedded Entitlements",
            Self::EntitlementsDer => "Embedded DER Entitlements",
            Self::DetachedSignature => "Detached Signature",
            Self::BlobWrapper => "Blob Wrapper",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Whether this magic may start a `SuperBlob`.
    pub fn is_superblob(&self) -> bool {
        matches!(
            self,
            Self::EmbeddedSignature | Self::EmbeddedSignatureOld | Self::DetachedSignature
        )
    }
}

impl Display for CodeSigningMagic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(v) => f.write_fmt(format_args!("Unknown (0x{:08x})", v)),
            _ => f.write_str(self.name()),
        }
    }
}

/// A well-known slot within code signing data.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeSigningSlot {
    CodeDirectory,
    Info,
    RequirementSet,
    ResourceDir,
    Application,
    Entitlements,
    RepSpecific,
    EntitlementsDer,
    AlternateCodeDirectory0,
    AlternateCodeDirectory1,
    AlternateCodeDirectory2,
    AlternateCodeDirectory3,
    AlternateCodeDirectory4,
    Signature,
    Identification,
    Ticket,
    Unknown(u32),
}

impl std::fmt::Debug for CodeSigningSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlternateCodeDirectory0
            | Self::AlternateCodeDirectory1
            | Self::AlternateCodeDirectory2
            | Self::AlternateCodeDirectory3
            | Self::AlternateCodeDirectory4 => f.write_fmt(format_args!(
                "CodeDirectory Alternate #{} ({})",
                u32::from(*self) - 0x1000,
                u32::from(*self)
            )),
            _ => f.write_fmt(format_args!("{} ({})", self.name(), u32::from(*self))),
        }
    }
}

impl From<u32> for CodeSigningSlot {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::CodeDirectory,
            1 => Self::Info,
            2 => Self::RequirementSet,
            3 => Self::ResourceDir,
            4 => Self::Application,
            5 => Self::Entitlements,
            6 => Self::RepSpecific,
            7 => Self::EntitlementsDer,
            0x1000 => Self::AlternateCodeDirectory0,
            0x1001 => Self::AlternateCodeDirectory1,
            0x1002 => Self::AlternateCodeDirectory2,
            0x1003 => Self::AlternateCodeDirectory3,
            0x1004 => Self::AlternateCodeDirectory4,
            0x10000 => Self::Signature,
            0x10001 => Self::Identification,
            0x10002 => Self::Ticket,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningSlot> for u32 {
    fn from(v: CodeSigningSlot) -> Self {
        match v {
            CodeSigningSlot::CodeDirectory => 0,
            CodeSigningSlot::Info => 1,
            CodeSigningSlot::RequirementSet => 2,
            CodeSigningSlot::ResourceDir => 3,
            CodeSigningSlot::Application => 4,
            CodeSigningSlot::Entitlements => 5,
            CodeSigningSlot::RepSpecific => 6,
            CodeSigningSlot::EntitlementsDer => 7,
            CodeSigningSlot::AlternateCodeDirectory0 => 0x1000,
            CodeSigningSlot::AlternateCodeDirectory1 => 0x1001,
            CodeSigningSlot::AlternateCodeDirectory2 => 0x1002,
            CodeSigningSlot::AlternateCodeDirectory3 => 0x1003,
            CodeSigningSlot::AlternateCodeDirectory4 => 0x1004,
            CodeSigningSlot::Signature => 0x10000,
            CodeSigningSlot::Identification => 0x10001,
            CodeSigningSlot::Ticket => 0x10002,
            CodeSigningSlot::Unknown(v) => v,
        }
    }
}

impl PartialOrd for CodeSigningSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CodeSigningSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        u32::from(*self).cmp(&u32::from(*other))
    }
}

impl Serialize for CodeSigningSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:?}", self))
    }
}

impl CodeSigningSlot {
    /// The alternate code directory slots, in slot order.
    pub const ALTERNATE_CODE_DIRECTORIES: [CodeSigningSlot; 5] = [
        Self::AlternateCodeDirectory0,
        Self::AlternateCodeDirectory1,
        Self::AlternateCodeDirectory2,
        Self::AlternateCodeDirectory3,
        Self::AlternateCodeDirectory4,
    ];

    /// Human readable name of this slot.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CodeDirectory => "CodeDirectory",
            Self::Info => "Info",
            Self::RequirementSet => "RequirementSet",
            Self::ResourceDir => "Resources",
            Self::Application => "Application",
            Self::Entitlements => "Entitlements",
            Self::RepSpecific => "Rep Specific",
            Self::EntitlementsDer => "DER Entitlements",
            Self::AlternateCodeDirectory0
            | Self::AlternateCodeDirectory1
            | Self::AlternateCodeDirectory2
            | Self::AlternateCodeDirectory3
            | Self::AlternateCodeDirectory4 => "CodeDirectory Alternate",
            Self::Signature => "CMS Signature",
            Self::Identification => "Identification",
            Self::Ticket => "Ticket",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Whether this slot has external data (as opposed to provided via a blob).
    pub fn has_external_content(&self) -> bool {
        matches!(self, Self::Info | Self::ResourceDir)
    }

    /// Whether this slot holds a code directory (primary or alternate).
    pub fn is_code_directory(&self) -> bool {
        matches!(self, Self::CodeDirectory) || self.is_alternate_code_directory()
    }

    pub fn is_alternate_code_directory(&self) -> bool {
        matches!(
            self,
            Self::AlternateCodeDirectory0
                | Self::AlternateCodeDirectory1
                | Self::AlternateCodeDirectory2
                | Self::AlternateCodeDirectory3
                | Self::AlternateCodeDirectory4
        )
    }

    /// Whether the slot can have a digest in the code directory special slots.
    ///
    /// Special slots are addressed by negative hash indices, so only small
    /// positive slot values are expressible. The code directory cannot
    /// digest itself.
    pub fn is_code_directory_specials_expressible(&self) -> bool {
        let v = u32::from(*self);

        v > 0 && v < u32::from(Self::AlternateCodeDirectory0)
    }
}

/// A single `BlobIndex` record from a `SuperBlob` index.
#[repr(C)]
#[derive(Clone, Copy, Eq, PartialEq, Pread)]
pub struct BlobIndex {
    /// Corresponds to a [CodeSigningSlot] variant.
    pub typ: u32,
    /// Offset of the blob from the start of the `SuperBlob`.
    pub offset: u32,
}

impl std::fmt::Debug for BlobIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BlobIndex")
            .field("type", &self.slot())
            .field("offset", &self.offset)
            .finish()
    }
}

impl BlobIndex {
    pub fn slot(&self) -> CodeSigningSlot {
        CodeSigningSlot::from(self.typ)
    }
}

/// Represents a digest type encountered in code signature data structures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DigestType {
    None,
    Sha1,
    Sha256,
    Sha256Truncated,
    Sha384,
    Sha512,
    Unknown(u8),
}

impl Default for DigestType {
    fn default() -> Self {
        Self::Sha256
    }
}

impl From<u8> for DigestType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Sha1,
            2 => Self::Sha256,
            3 => Self::Sha256Truncated,
            4 => Self::Sha384,
            5 => Self::Sha512,
            _ => Self::Unknown(v),
        }
    }
}

impl From<DigestType> for u8 {
    fn from(v: DigestType) -> u8 {
        match v {
            DigestType::None => 0,
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
            DigestType::Sha256Truncated => 3,
            DigestType::Sha384 => 4,
            DigestType::Sha512 => 5,
            DigestType::Unknown(v) => v,
        }
    }
}

impl Display for DigestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestType::None => f.write_str("none"),
            DigestType::Sha1 => f.write_str("sha1"),
            DigestType::Sha256 => f.write_str("sha256"),
            DigestType::Sha256Truncated => f.write_str("sha256-truncated"),
            DigestType::Sha384 => f.write_str("sha384"),
            DigestType::Sha512 => f.write_str("sha512"),
            DigestType::Unknown(v) => f.write_fmt(format_args!("unknown: {}", v)),
        }
    }
}

impl Serialize for DigestType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl DigestType {
    /// Obtain the size of hashes for this hash type.
    ///
    /// This is the size of digests as stored in code directory hash slots, so
    /// truncated variants report their truncated size.
    pub fn hash_len(&self) -> Result<usize, CodeSignatureError> {
        match self {
            Self::None => Err(CodeSignatureError::DigestNoAlgorithm),
            Self::Sha1 => Ok(20),
            Self::Sha256 => Ok(32),
            Self::Sha256Truncated => Ok(20),
            Self::Sha384 => Ok(48),
            Self::Sha512 => Ok(64),
            Self::Unknown(v) => Err(CodeSignatureError::DigestUnknownAlgorithm(*v)),
        }
    }

    /// Obtain a hasher for this digest type.
    pub fn as_hasher(&self) -> Result<ring::digest::Context, CodeSignatureError> {
        match self {
            Self::None => Err(CodeSignatureError::DigestNoAlgorithm),
            Self::Sha1 => Ok(ring::digest::Context::new(
                &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            )),
            Self::Sha256 | Self::Sha256Truncated => {
                Ok(ring::digest::Context::new(&ring::digest::SHA256))
            }
            Self::Sha384 => Ok(ring::digest::Context::new(&ring::digest::SHA384)),
            Self::Sha512 => Ok(ring::digest::Context::new(&ring::digest::SHA512)),
            Self::Unknown(v) => Err(CodeSignatureError::DigestUnknownAlgorithm(*v)),
        }
    }

    /// Digest data given the configured hasher.
    pub fn digest_data(&self, data: &[u8]) -> Result<Vec<u8>, CodeSignatureError> {
        let mut hasher = self.as_hasher()?;

        hasher.update(data);
        let mut hash = hasher.finish().as_ref().to_vec();
        hash.truncate(self.hash_len()?);

        Ok(hash)
    }
}

/// A digest stored in signature data.
#[derive(Clone, Eq, PartialEq)]
pub struct Digest<'a> {
    pub data: Cow<'a, [u8]>,
}

impl<'a> Digest<'a> {
    /// Whether this is the null hash (all 0s).
    pub fn is_null(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub fn to_owned(&self) -> Digest<'static> {
        Digest {
            data: Cow::Owned(self.data.clone().into_owned()),
        }
    }

    pub fn as_hex(&self) -> String {
        hex::encode(&self.data)
    }
}

impl<'a> std::fmt::Debug for Digest<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.data))
    }
}

impl<'a> From<Vec<u8>> for Digest<'a> {
    fn from(v: Vec<u8>) -> Self {
        Self { data: v.into() }
    }
}

impl<'a> From<&'a [u8]> for Digest<'a> {
    fn from(v: &'a [u8]) -> Self {
        Self { data: v.into() }
    }
}

impl<'a> Serialize for Digest<'a> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

/// Read the header from a Blob.
///
/// Blobs begin with a u32 magic and u32 length, inclusive.
pub(crate) fn read_blob_header(data: &[u8]) -> Result<(u32, usize, &[u8]), scroll::Error> {
    let magic = data.pread_with(0, scroll::BE)?;
    let length = data.pread_with::<u32>(4, scroll::BE)?;

    Ok((magic, length as usize, &data[BLOB_HEADER_SIZE..]))
}

/// Read the blob header and bound the blob to its declared length.
///
/// Returns the magic and the blob bytes (header included) limited to the
/// self-reported length.
pub(crate) fn read_bounded_blob(data: &[u8]) -> Result<(u32, &[u8]), CodeSignatureError> {
    let (magic, length, _) = read_blob_header(data)?;

    if length < BLOB_HEADER_SIZE {
        return Err(CodeSignatureError::BlobLengthTooShort(length));
    }

    if length > data.len() {
        return Err(CodeSignatureError::BlobLengthOutOfBounds {
            length,
            available: data.len(),
        });
    }

    Ok((magic, &data[0..length]))
}

/// Read a blob header, verify its magic and return the bounded blob bytes.
pub(crate) fn read_and_validate_blob_header<'a>(
    data: &'a [u8],
    expected_magic: u32,
    what: &'static str,
) -> Result<&'a [u8], CodeSignatureError> {
    let (magic, data) = read_bounded_blob(data)?;

    if magic != expected_magic {
        Err(CodeSignatureError::BadMagic(what))
    } else {
        Ok(data)
    }
}

/// Provides common features for a parsed blob type.
///
/// Blob types are views over the caller's buffer. [Blob::blob_bytes] exposes
/// the exact stored bytes, header included.
pub trait Blob<'a>
where
    Self: Sized,
{
    /// The header magic that identifies this format.
    fn magic() -> u32;

    /// Attempt to construct an instance by parsing a bytes slice.
    ///
    /// The slice begins with the 8 byte blob header denoting the magic
    /// and length.
    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError>;

    /// The raw blob bytes, including magic and length.
    fn blob_bytes(&self) -> &'a [u8];

    /// The blob payload, without the blob header.
    fn payload(&self) -> &'a [u8] {
        &self.blob_bytes()[BLOB_HEADER_SIZE..]
    }

    /// Obtain the digest of the blob using the specified hasher.
    ///
    /// This digests the bytes as stored, which is what special slot digests
    /// in the code directory cover.
    fn digest_with(&self, hash_type: DigestType) -> Result<Vec<u8>, CodeSignatureError> {
        hash_type.digest_data(self.blob_bytes())
    }
}

macro_rules! framed_blob {
    ($(#[$meta:meta])* $name:ident, $magic:expr, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        pub struct $name<'a> {
            data: &'a [u8],
        }

        impl<'a> Blob<'a> for $name<'a> {
            fn magic() -> u32 {
                u32::from($magic)
            }

            fn from_blob_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError> {
                Ok(Self {
                    data: read_and_validate_blob_header(data, Self::magic(), $what)?,
                })
            }

            fn blob_bytes(&self) -> &'a [u8] {
                self.data
            }
        }

        impl<'a> std::fmt::Debug for $name<'a> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("length", &self.data.len())
                    .finish()
            }
        }
    };
}

framed_blob!(
    /// Represents an embedded signature nested as a blob.
    EmbeddedSignatureBlob,
    CodeSigningMagic::EmbeddedSignature,
    "embedded signature blob"
);

framed_blob!(
    /// An old embedded signature.
    EmbeddedSignatureOldBlob,
    CodeSigningMagic::EmbeddedSignatureOld,
    "old embedded signature blob"
);

framed_blob!(
    /// A detached signature.
    ///
    /// This is a `SuperBlob` of per-architecture embedded signatures.
    DetachedSignatureBlob,
    CodeSigningMagic::DetachedSignature,
    "detached signature blob"
);

framed_blob!(
    /// Represents an Entitlements blob.
    ///
    /// An entitlements blob contains an XML plist with a dict. The plist is
    /// not interpreted here.
    EntitlementsBlob,
    CodeSigningMagic::Entitlements,
    "entitlements blob"
);

framed_blob!(
    /// Represents a DER encoded entitlements blob.
    EntitlementsDerBlob,
    CodeSigningMagic::EntitlementsDer,
    "DER entitlements blob"
);

framed_blob!(
    /// Represents a generic blob wrapper.
    ///
    /// The payload of the CMS signature slot is one of these.
    BlobWrapperBlob,
    CodeSigningMagic::BlobWrapper,
    "blob wrapper blob"
);

impl<'a> EmbeddedSignatureBlob<'a> {
    /// Parse the nested `SuperBlob`.
    pub fn parse_signature(&self) -> Result<EmbeddedSignature<'a>, CodeSignatureError> {
        EmbeddedSignature::from_bytes(self.data)
    }
}

impl<'a> EmbeddedSignatureOldBlob<'a> {
    /// Parse the nested `SuperBlob`.
    pub fn parse_signature(&self) -> Result<EmbeddedSignature<'a>, CodeSignatureError> {
        EmbeddedSignature::from_bytes(self.data)
    }
}

impl<'a> DetachedSignatureBlob<'a> {
    /// Parse the `SuperBlob` holding the per-architecture signatures.
    pub fn parse_signature(&self) -> Result<EmbeddedSignature<'a>, CodeSignatureError> {
        EmbeddedSignature::from_bytes(self.data)
    }
}

impl<'a> EntitlementsBlob<'a> {
    /// Obtain the plist payload as a string.
    pub fn as_str(&self) -> Result<&'a str, CodeSignatureError> {
        std::str::from_utf8(self.payload()).map_err(CodeSignatureError::EntitlementsBadUtf8)
    }
}

/// Represents an unknown blob type.
#[derive(Clone, Copy)]
pub struct OtherBlob<'a> {
    pub magic: u32,
    data: &'a [u8],
}

impl<'a> Blob<'a> for OtherBlob<'a> {
    fn magic() -> u32 {
        // Use a placeholder magic value because there is no self bind here.
        u32::MAX
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError> {
        let (magic, data) = read_bounded_blob(data)?;

        Ok(Self { magic, data })
    }

    fn blob_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> std::fmt::Debug for OtherBlob<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "OtherBlob(0x{:08x}, {})",
            self.magic,
            hex::encode(self.payload())
        ))
    }
}

/// Represents a single, parsed Blob entry/slot.
///
/// Each variant corresponds to a [CodeSigningMagic] blob type.
#[derive(Debug)]
pub enum BlobData<'a> {
    Requirement(Box<RequirementBlob<'a>>),
    RequirementSet(Box<RequirementSetBlob<'a>>),
    CodeDirectory(Box<CodeDirectoryBlob<'a>>),
    EmbeddedSignature(Box<EmbeddedSignatureBlob<'a>>),
    EmbeddedSignatureOld(Box<EmbeddedSignatureOldBlob<'a>>),
    Entitlements(Box<EntitlementsBlob<'a>>),
    EntitlementsDer(Box<EntitlementsDerBlob<'a>>),
    DetachedSignature(Box<DetachedSignatureBlob<'a>>),
    BlobWrapper(Box<BlobWrapperBlob<'a>>),
    Other(Box<OtherBlob<'a>>),
}

impl<'a> Blob<'a> for BlobData<'a> {
    fn magic() -> u32 {
        u32::MAX
    }

    /// Parse blob data by reading its magic and feeding into magic-specific parser.
    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError> {
        let (magic, data) = read_bounded_blob(data)?;

        let magic = CodeSigningMagic::from(magic);

        Ok(match magic {
            CodeSigningMagic::Requirement => {
                Self::Requirement(Box::new(RequirementBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::RequirementSet => {
                Self::RequirementSet(Box::new(RequirementSetBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::CodeDirectory => {
                Self::CodeDirectory(Box::new(CodeDirectoryBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::EmbeddedSignature => {
                Self::EmbeddedSignature(Box::new(EmbeddedSignatureBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::EmbeddedSignatureOld => Self::EmbeddedSignatureOld(Box::new(
                EmbeddedSignatureOldBlob::from_blob_bytes(data)?,
            )),
            CodeSigningMagic::Entitlements => {
                Self::Entitlements(Box::new(EntitlementsBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::EntitlementsDer => {
                Self::EntitlementsDer(Box::new(EntitlementsDerBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::DetachedSignature => {
                Self::DetachedSignature(Box::new(DetachedSignatureBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::BlobWrapper => {
                Self::BlobWrapper(Box::new(BlobWrapperBlob::from_blob_bytes(data)?))
            }
            CodeSigningMagic::Unknown(value) => {
                debug!("unrecognized blob magic 0x{:08x}", value);
                Self::Other(Box::new(OtherBlob::from_blob_bytes(data)?))
            }
        })
    }

    fn blob_bytes(&self) -> &'a [u8] {
        match self {
            Self::Requirement(b) => b.blob_bytes(),
            Self::RequirementSet(b) => b.blob_bytes(),
            Self::CodeDirectory(b) => b.blob_bytes(),
            Self::EmbeddedSignature(b) => b.blob_bytes(),
            Self::EmbeddedSignatureOld(b) => b.blob_bytes(),
            Self::Entitlements(b) => b.blob_bytes(),
            Self::EntitlementsDer(b) => b.blob_bytes(),
            Self::DetachedSignature(b) => b.blob_bytes(),
            Self::BlobWrapper(b) => b.blob_bytes(),
            Self::Other(b) => b.blob_bytes(),
        }
    }
}

impl<'a> BlobData<'a> {
    /// The magic of the parsed blob.
    pub fn magic_value(&self) -> CodeSigningMagic {
        match self {
            Self::Other(b) => CodeSigningMagic::Unknown(b.magic),
            _ => match read_blob_header(self.blob_bytes()) {
                Ok((magic, _, _)) => CodeSigningMagic::from(magic),
                Err(_) => CodeSigningMagic::Unknown(u32::MAX),
            },
        }
    }
}

/// Represents a single blob as defined by a SuperBlob index entry.
///
/// Instances have copies of their own index info, including the relative
/// order, slot type, and start offset within the `SuperBlob`.
///
/// The blob data is unparsed in this type. The blob payloads can be
/// turned into [ParsedBlob] via `.try_into()`.
#[derive(Clone)]
pub struct BlobEntry<'a> {
    /// Our blob index within the `SuperBlob`.
    pub index: usize,

    /// The slot type.
    pub slot: CodeSigningSlot,

    /// Our start offset within the `SuperBlob`.
    ///
    /// First byte is start of our magic.
    pub offset: usize,

    /// The magic value appearing at the beginning of the blob.
    pub magic: CodeSigningMagic,

    /// The self-reported length of the blob, header included.
    pub length: usize,

    /// The raw data in this blob, including magic and length.
    pub data: &'a [u8],
}

impl<'a> std::fmt::Debug for BlobEntry<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BlobEntry")
            .field("index", &self.index)
            .field("slot", &self.slot)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("magic", &self.magic)
            .finish()
    }
}

impl<'a> BlobEntry<'a> {
    /// Attempt to convert to a [ParsedBlob].
    pub fn into_parsed_blob(self) -> Result<ParsedBlob<'a>, CodeSignatureError> {
        self.try_into()
    }

    /// Obtain the payload of this blob.
    ///
    /// This is the data in the blob without the blob header.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[BLOB_HEADER_SIZE..]
    }

    /// Compute the content digest of this blob using the specified hash type.
    pub fn digest_with(&self, hash: DigestType) -> Result<Vec<u8>, CodeSignatureError> {
        hash.digest_data(self.data)
    }
}

/// Represents the parsed content of a blob entry.
#[derive(Debug)]
pub struct ParsedBlob<'a> {
    /// The blob record this blob came from.
    pub blob_entry: BlobEntry<'a>,

    /// The parsed blob data.
    pub blob: BlobData<'a>,
}

impl<'a> ParsedBlob<'a> {
    /// Compute the content digest of this blob using the specified hash type.
    pub fn digest_with(&self, hash: DigestType) -> Result<Vec<u8>, CodeSignatureError> {
        hash.digest_data(self.blob_entry.data)
    }
}

impl<'a> TryFrom<BlobEntry<'a>> for ParsedBlob<'a> {
    type Error = CodeSignatureError;

    fn try_from(blob_entry: BlobEntry<'a>) -> Result<Self, Self::Error> {
        let blob = BlobData::from_blob_bytes(blob_entry.data)?;

        Ok(Self { blob_entry, blob })
    }
}

/// A failure to resolve or decode a single `SuperBlob` index entry.
///
/// Carries enough context to locate the fault in the signature data.
#[derive(Debug)]
pub struct BlobEntryError {
    /// Position of the entry in the `SuperBlob` index.
    pub index: usize,
    /// The slot type of the entry.
    pub slot: CodeSigningSlot,
    /// The offset of the entry within the `SuperBlob`.
    pub offset: u32,
    /// What went wrong.
    pub error: CodeSignatureError,
}

impl Display for BlobEntryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "blob #{} for slot {:?} at offset {}: {}",
            self.index, self.slot, self.offset, self.error
        ))
    }
}

impl std::error::Error for BlobEntryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The outcome of decoding a single `SuperBlob` index entry.
pub type BlobDecodeResult<'a> = Result<ParsedBlob<'a>, BlobEntryError>;

/// Represents Apple's common embedded code signature data structures.
///
/// This type represents a lightly parsed `SuperBlob`. Its magic is one of
/// [CodeSigningMagic::EmbeddedSignature], [CodeSigningMagic::EmbeddedSignatureOld]
/// or [CodeSigningMagic::DetachedSignature].
pub struct EmbeddedSignature<'a> {
    /// Magic value from header.
    pub magic: CodeSigningMagic,
    /// Length of this super blob.
    pub length: u32,
    /// Number of blobs in this super blob.
    pub count: u32,

    /// Raw data backing this super blob, bounded to `length`.
    pub data: &'a [u8],

    /// The index records, in on-disk order.
    pub index: Vec<BlobIndex>,

    /// The blobs whose index entry could be resolved, in index order.
    ///
    /// Entries that failed to resolve are available via
    /// [EmbeddedSignature::malformed_entries].
    pub blobs: Vec<BlobEntry<'a>>,
}

impl<'a> std::fmt::Debug for EmbeddedSignature<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SuperBlob")
            .field("magic", &self.magic)
            .field("length", &self.length)
            .field("count", &self.count)
            .field("blobs", &self.blobs)
            .finish()
    }
}

// There are other impl blocks for this structure in other modules.
impl<'a> EmbeddedSignature<'a> {
    /// Attempt to parse an embedded signature super blob from data.
    ///
    /// The argument to this function is likely the subset of the
    /// `__LINKEDIT` Mach-O section that the `LC_CODE_SIGNATURE` load instructions
    /// points it.
    ///
    /// Only the header and index are validated here. Failure to resolve an
    /// individual index entry does not fail parsing.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError> {
        let offset = &mut 0;

        // Parse the 3 fields from the SuperBlob.
        let magic = CodeSigningMagic::from(data.gread_with::<u32>(offset, scroll::BE)?);

        if !magic.is_superblob() {
            return Err(CodeSignatureError::BadMagic(
                "embedded signature super blob",
            ));
        }

        let length = data.gread_with::<u32>(offset, scroll::BE)?;
        let count = data.gread_with::<u32>(offset, scroll::BE)?;

        if length as usize > data.len() {
            return Err(CodeSignatureError::SuperblobLengthOutOfBounds {
                length,
                available: data.len(),
            });
        }

        let index_end = SUPERBLOB_HEADER_SIZE as u64 + BLOB_INDEX_SIZE as u64 * count as u64;
        if index_end > length as u64 {
            return Err(CodeSignatureError::SuperblobIndexOutOfBounds { count, length });
        }

        // Nothing past the self-reported length belongs to us.
        let data = &data[0..length as usize];

        // Following the SuperBlob header is an array of .count BlobIndex defining
        // the Blob that follow.
        let mut index = Vec::with_capacity(count as usize);
        for _ in 0..count {
            index.push(data.gread_with::<BlobIndex>(offset, scroll::BE)?);
        }

        let mut signature = Self {
            magic,
            length,
            count,
            data,
            index,
            blobs: vec![],
        };

        let blobs = (0..signature.index.len())
            .filter_map(|i| match signature.resolve_entry(i) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("unable to resolve {:?}: {}", signature.index[i], e);
                    None
                }
            })
            .collect::<Vec<_>>();
        signature.blobs = blobs;

        Ok(signature)
    }

    /// The byte offset at which blob data may start (end of the index).
    pub fn index_end_offset(&self) -> usize {
        SUPERBLOB_HEADER_SIZE + BLOB_INDEX_SIZE * self.index.len()
    }

    /// Resolve the index entry at position `i` into a [BlobEntry].
    ///
    /// The BlobIndex doesn't declare the length of each Blob. However, the
    /// first 8 bytes of each blob contain the u32 magic and u32 length. The
    /// declared length must fit between the blob offset and the end of the
    /// `SuperBlob`. Offsets are not assumed to be sorted, so the next index
    /// entry is not used as a bound.
    pub fn resolve_entry(&self, i: usize) -> Result<BlobEntry<'a>, CodeSignatureError> {
        let record = self
            .index
            .get(i)
            .ok_or(CodeSignatureError::SuperblobIndexOutOfBounds {
                count: self.count,
                length: self.length,
            })?;
        let slot = record.slot();

        if record.offset >= self.length {
            return Err(CodeSignatureError::BlobOffsetOutOfBounds {
                slot,
                offset: record.offset,
                length: self.length,
            });
        }

        if (record.offset as usize) < self.index_end_offset() {
            return Err(CodeSignatureError::BlobOffsetInsideIndex {
                slot,
                offset: record.offset,
            });
        }

        let (magic, data) = read_bounded_blob(&self.data[record.offset as usize..])?;

        if let CodeSigningSlot::Unknown(v) = slot {
            debug!("unrecognized slot type 0x{:x} at offset {}", v, record.offset);
        }

        Ok(BlobEntry {
            index: i,
            slot,
            offset: record.offset as usize,
            magic: magic.into(),
            length: data.len(),
            data,
        })
    }

    /// Obtain the index entries that failed to resolve.
    pub fn malformed_entries(&self) -> Vec<BlobEntryError> {
        (0..self.index.len())
            .filter_map(|i| {
                self.resolve_entry(i).err().map(|error| BlobEntryError {
                    index: i,
                    slot: self.index[i].slot(),
                    offset: self.index[i].offset,
                    error,
                })
            })
            .collect()
    }

    /// Decode every index entry by its magic.
    ///
    /// Each entry is decoded independently. The returned vector has one
    /// element per index record, in index order.
    pub fn parse_blobs(&self) -> Vec<BlobDecodeResult<'a>> {
        (0..self.index.len())
            .map(|i| {
                self.resolve_entry(i)
                    .and_then(|entry| entry.into_parsed_blob())
                    .map_err(|error| BlobEntryError {
                        index: i,
                        slot: self.index[i].slot(),
                        offset: self.index[i].offset,
                        error,
                    })
            })
            .collect()
    }

    /// Serialize the `SuperBlob` header and index.
    ///
    /// For data parsed by [EmbeddedSignature::from_bytes], this reproduces the
    /// first [EmbeddedSignature::index_end_offset] bytes of the input.
    pub fn header_and_index_bytes(&self) -> Result<Vec<u8>, CodeSignatureError> {
        let mut res = Vec::with_capacity(self.index_end_offset());

        res.iowrite_with(u32::from(self.magic), scroll::BE)?;
        res.iowrite_with(self.length, scroll::BE)?;
        res.iowrite_with(self.count, scroll::BE)?;
        for index in &self.index {
            res.iowrite_with(index.typ, scroll::BE)?;
            res.iowrite_with(index.offset, scroll::BE)?;
        }

        Ok(res)
    }

    /// Find the first occurrence of the specified slot.
    pub fn find_slot(&self, slot: CodeSigningSlot) -> Option<&BlobEntry<'a>> {
        self.blobs.iter().find(|e| e.slot == slot)
    }

    /// Find and resolve the first index entry for the specified slot.
    ///
    /// Unlike [EmbeddedSignature::find_slot], a slot whose entry is malformed
    /// yields its resolution error instead of `None`.
    pub fn find_slot_entry(
        &self,
        slot: CodeSigningSlot,
    ) -> Result<Option<BlobEntry<'a>>, CodeSignatureError> {
        match self.index.iter().position(|i| i.slot() == slot) {
            Some(i) => Ok(Some(self.resolve_entry(i)?)),
            None => Ok(None),
        }
    }

    pub fn find_slot_parsed(
        &self,
        slot: CodeSigningSlot,
    ) -> Result<Option<ParsedBlob<'a>>, CodeSignatureError> {
        if let Some(entry) = self.find_slot_entry(slot)? {
            Ok(Some(entry.into_parsed_blob()?))
        } else {
            Ok(None)
        }
    }

    fn code_directory_in_slot(
        &self,
        slot: CodeSigningSlot,
    ) -> Result<Option<Box<CodeDirectoryBlob<'a>>>, CodeSignatureError> {
        if let Some(parsed) = self.find_slot_parsed(slot)? {
            if let BlobData::CodeDirectory(cd) = parsed.blob {
                Ok(Some(cd))
            } else {
                Err(CodeSignatureError::BadMagic("code directory blob"))
            }
        } else {
            Ok(None)
        }
    }

    /// Attempt to resolve a parsed `CodeDirectoryBlob` for this signature data.
    ///
    /// Returns Err on data parsing error or if the blob slot didn't contain a code
    /// directory.
    ///
    /// Returns `Ok(None)` if there is no code directory slot.
    pub fn code_directory(&self) -> Result<Option<Box<CodeDirectoryBlob<'a>>>, CodeSignatureError> {
        self.code_directory_in_slot(CodeSigningSlot::CodeDirectory)
    }

    /// Attempt to resolve alternate code directories for this signature data.
    ///
    /// Each present alternate slot yields its own result so one bad alternate
    /// doesn't hide the others.
    pub fn alternate_code_directories(
        &self,
    ) -> Vec<(
        CodeSigningSlot,
        Result<Box<CodeDirectoryBlob<'a>>, CodeSignatureError>,
    )> {
        CodeSigningSlot::ALTERNATE_CODE_DIRECTORIES
            .iter()
            .filter_map(|slot| match self.code_directory_in_slot(*slot) {
                Ok(Some(cd)) => Some((*slot, Ok(cd))),
                Ok(None) => None,
                Err(e) => Some((*slot, Err(e))),
            })
            .collect()
    }

    /// Attempt to resolve a parsed [EntitlementsBlob] for this signature data.
    ///
    /// Returns Err on data parsing error or if the blob slot didn't contain an entitlments
    /// blob.
    ///
    /// Returns `Ok(None)` if there is no entitlements slot.
    pub fn entitlements(&self) -> Result<Option<Box<EntitlementsBlob<'a>>>, CodeSignatureError> {
        if let Some(parsed) = self.find_slot_parsed(CodeSigningSlot::Entitlements)? {
            if let BlobData::Entitlements(entitlements) = parsed.blob {
                Ok(Some(entitlements))
            } else {
                Err(CodeSignatureError::BadMagic("entitlements blob"))
            }
        } else {
            Ok(None)
        }
    }

    /// Attempt to resolve a parsed [EntitlementsDerBlob] for this signature data.
    pub fn entitlements_der(
        &self,
    ) -> Result<Option<Box<EntitlementsDerBlob<'a>>>, CodeSignatureError> {
        if let Some(parsed) = self.find_slot_parsed(CodeSigningSlot::EntitlementsDer)? {
            if let BlobData::EntitlementsDer(entitlements) = parsed.blob {
                Ok(Some(entitlements))
            } else {
                Err(CodeSignatureError::BadMagic("DER entitlements blob"))
            }
        } else {
            Ok(None)
        }
    }

    /// Attempt to resolve a parsed [RequirementSetBlob] for this signature data.
    ///
    /// Returns Err on data parsing error or if the blob slot didn't contain a requirements
    /// blob.
    ///
    /// Returns `Ok(None)` if there is no requirements slot.
    pub fn code_requirements(
        &self,
    ) -> Result<Option<Box<RequirementSetBlob<'a>>>, CodeSignatureError> {
        if let Some(parsed) = self.find_slot_parsed(CodeSigningSlot::RequirementSet)? {
            if let BlobData::RequirementSet(reqs) = parsed.blob {
                Ok(Some(reqs))
            } else {
                Err(CodeSignatureError::BadMagic("requirements blob"))
            }
        } else {
            Ok(None)
        }
    }

    /// Attempt to resolve raw CMS signature data.
    ///
    /// The returned data is likely DER PKCS#7 with the root object
    /// pkcs7-signedData (1.2.840.113549.1.7.2). It is not parsed here.
    pub fn signature_data(&self) -> Result<Option<&'a [u8]>, CodeSignatureError> {
        if let Some(parsed) = self.find_slot_parsed(CodeSigningSlot::Signature)? {
            if let BlobData::BlobWrapper(wrapper) = parsed.blob {
                // Sometime we get an empty data slice. This has been observed on DMG signatures.
                // In that scenario, pretend there is no CMS data at all.
                let payload = wrapper.payload();

                if payload.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(payload))
                }
            } else {
                Err(CodeSignatureError::BadMagic("blob wrapper blob"))
            }
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{error::ErrorKind, testutil::*},
    };

    #[test]
    fn magic_registry() {
        assert_eq!(
            CodeSigningMagic::from(0xfade0cc0),
            CodeSigningMagic::EmbeddedSignature
        );
        assert_eq!(
            CodeSigningMagic::from(0xfade0b01),
            CodeSigningMagic::BlobWrapper
        );
        assert_eq!(
            CodeSigningMagic::from(0x12345678),
            CodeSigningMagic::Unknown(0x12345678)
        );
        assert_eq!(u32::from(CodeSigningMagic::Unknown(0x12345678)), 0x12345678);
        assert_eq!(
            CodeSigningMagic::DetachedSignature.to_string(),
            "Detached Signature"
        );
        assert_eq!(
            CodeSigningMagic::Unknown(0xabc).to_string(),
            "Unknown (0x00000abc)"
        );
        assert!(CodeSigningMagic::EmbeddedSignatureOld.is_superblob());
        assert!(!CodeSigningMagic::CodeDirectory.is_superblob());

        for v in [
            0xfade0c00, 0xfade0c01, 0xfade0c02, 0xfade0cc0, 0xfade0b02, 0xfade7171, 0xfade7172,
            0xfade0cc1, 0xfade0b01,
        ] {
            assert!(!matches!(
                CodeSigningMagic::from(v),
                CodeSigningMagic::Unknown(_)
            ));
            assert_eq!(u32::from(CodeSigningMagic::from(v)), v);
        }
    }

    #[test]
    fn slot_registry() {
        assert_eq!(CodeSigningSlot::from(0), CodeSigningSlot::CodeDirectory);
        assert_eq!(
            CodeSigningSlot::from(0x1003),
            CodeSigningSlot::AlternateCodeDirectory3
        );
        assert_eq!(CodeSigningSlot::from(0x10000), CodeSigningSlot::Signature);
        assert_eq!(CodeSigningSlot::from(0x10002), CodeSigningSlot::Ticket);
        assert_eq!(CodeSigningSlot::from(0x1005), CodeSigningSlot::Unknown(0x1005));
        assert_eq!(
            format!("{:?}", CodeSigningSlot::AlternateCodeDirectory2),
            "CodeDirectory Alternate #2 (4098)"
        );
        assert_eq!(
            format!("{:?}", CodeSigningSlot::Entitlements),
            "Entitlements (5)"
        );
        assert!(CodeSigningSlot::Entitlements.is_code_directory_specials_expressible());
        assert!(!CodeSigningSlot::CodeDirectory.is_code_directory_specials_expressible());
        assert!(!CodeSigningSlot::Signature.is_code_directory_specials_expressible());
        assert!(CodeSigningSlot::AlternateCodeDirectory0.is_code_directory());
        assert!(CodeSigningSlot::Info < CodeSigningSlot::Signature);
    }

    #[test]
    fn digest_type_widths() {
        assert_eq!(DigestType::Sha1.hash_len().unwrap(), 20);
        assert_eq!(DigestType::Sha256.hash_len().unwrap(), 32);
        assert_eq!(DigestType::Sha256Truncated.hash_len().unwrap(), 20);
        assert_eq!(DigestType::Sha384.hash_len().unwrap(), 48);
        assert_eq!(DigestType::Sha512.hash_len().unwrap(), 64);
        assert_eq!(
            DigestType::Unknown(9).hash_len().unwrap_err().kind(),
            ErrorKind::UnsupportedHashType
        );
        assert_eq!(
            DigestType::None.digest_data(b"").unwrap_err().kind(),
            ErrorKind::UnsupportedHashType
        );

        for t in [
            DigestType::Sha1,
            DigestType::Sha256,
            DigestType::Sha256Truncated,
            DigestType::Sha384,
            DigestType::Sha512,
        ] {
            assert_eq!(t.digest_data(b"foo").unwrap().len(), t.hash_len().unwrap());
        }

        assert_eq!(
            hex::encode(DigestType::Sha256.digest_data(b"abc").unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(DigestType::Sha256Truncated.digest_data(b"abc").unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a3"
        );
        assert_eq!(
            hex::encode(DigestType::Sha1.digest_data(b"abc").unwrap()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn parse_header_and_index() {
        let cd = CodeDirectoryFixture::sha256_pages(&[0u8; 100], 12).build();
        let data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[
                (CodeSigningSlot::CodeDirectory, cd.clone()),
                (CodeSigningSlot::Entitlements, entitlements_blob("<dict/>")),
            ],
        );

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        assert_eq!(sig.magic, CodeSigningMagic::EmbeddedSignature);
        assert_eq!(sig.length as usize, data.len());
        assert_eq!(sig.count, 2);
        assert_eq!(sig.index.len(), 2);
        assert_eq!(sig.blobs.len(), 2);
        assert!(sig.malformed_entries().is_empty());

        let entry = &sig.blobs[0];
        assert_eq!(entry.slot, CodeSigningSlot::CodeDirectory);
        assert_eq!(entry.offset, 28);
        assert_eq!(entry.magic, CodeSigningMagic::CodeDirectory);
        assert_eq!(entry.data, &cd[..]);

        let ents = sig.entitlements().unwrap().unwrap();
        assert_eq!(ents.as_str().unwrap(), "<dict/>");
        assert!(sig.code_directory().unwrap().is_some());
        assert!(sig.code_requirements().unwrap().is_none());
        assert!(sig.signature_data().unwrap().is_none());
    }

    #[test]
    fn header_and_index_round_trip() {
        let cd = CodeDirectoryFixture::sha256_pages(&[1u8; 5000], 12).build();
        let data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[
                (CodeSigningSlot::CodeDirectory, cd),
                (CodeSigningSlot::RequirementSet, empty_requirement_set()),
                (CodeSigningSlot::Signature, blob_wrapper(b"")),
            ],
        );

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        let encoded = sig.header_and_index_bytes().unwrap();
        assert_eq!(encoded.len(), sig.index_end_offset());
        assert_eq!(&encoded[..], &data[0..sig.index_end_offset()]);
    }

    #[test]
    fn unsorted_offsets() {
        // Place the entitlements blob first in the payload but list it second.
        let ents = entitlements_blob("<plist/>");
        let wrapper = blob_wrapper(b"\x30\x80");
        let payload_start = 12 + 16;

        let mut data: Vec<u8> = vec![];
        data.iowrite_with(0xfade0cc0u32, scroll::BE).unwrap();
        data.iowrite_with((payload_start + ents.len() + wrapper.len()) as u32, scroll::BE)
            .unwrap();
        data.iowrite_with(2u32, scroll::BE).unwrap();
        data.iowrite_with(0x10000u32, scroll::BE).unwrap();
        data.iowrite_with((payload_start + ents.len()) as u32, scroll::BE).unwrap();
        data.iowrite_with(5u32, scroll::BE).unwrap();
        data.iowrite_with(payload_start as u32, scroll::BE).unwrap();
        data.extend_from_slice(&ents);
        data.extend_from_slice(&wrapper);

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        assert_eq!(sig.blobs[0].slot, CodeSigningSlot::Signature);
        assert_eq!(sig.blobs[1].slot, CodeSigningSlot::Entitlements);
        assert_eq!(sig.signature_data().unwrap(), Some(&b"\x30\x80"[..]));
        assert_eq!(sig.entitlements().unwrap().unwrap().payload(), b"<plist/>");
    }

    #[test]
    fn bad_superblob_magic() {
        let mut data = superblob(CodeSigningMagic::EmbeddedSignature, &[]);
        data[3] = 0x02;

        assert!(matches!(
            EmbeddedSignature::from_bytes(&data),
            Err(CodeSignatureError::BadMagic(_))
        ));
    }

    #[test]
    fn other_superblob_magics() {
        for magic in [
            CodeSigningMagic::EmbeddedSignatureOld,
            CodeSigningMagic::DetachedSignature,
        ] {
            let data = superblob(magic, &[(CodeSigningSlot::Ticket, blob_wrapper(b"x"))]);
            let sig = EmbeddedSignature::from_bytes(&data).unwrap();
            assert_eq!(sig.magic, magic);
            assert_eq!(sig.blobs.len(), 1);
        }
    }

    #[test]
    fn length_exceeds_buffer() {
        let data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[(CodeSigningSlot::Entitlements, entitlements_blob("<dict/>"))],
        );

        // Supply a truncated buffer; the header still claims the full length.
        let truncated = &data[0..data.len() - 1];
        let err = EmbeddedSignature::from_bytes(truncated).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(matches!(
            err,
            CodeSignatureError::SuperblobLengthOutOfBounds { length, available }
                if length as usize == data.len() && available == data.len() - 1
        ));
    }

    #[test]
    fn index_exceeds_length() {
        let mut data: Vec<u8> = vec![];
        data.iowrite_with(0xfade0cc0u32, scroll::BE).unwrap();
        data.iowrite_with(20u32, scroll::BE).unwrap();
        // Two entries need 28 bytes.
        data.iowrite_with(2u32, scroll::BE).unwrap();
        data.extend_from_slice(&[0u8; 16]);

        let err = EmbeddedSignature::from_bytes(&data).unwrap_err();
        assert!(matches!(
            err,
            CodeSignatureError::SuperblobIndexOutOfBounds {
                count: 2,
                length: 20
            }
        ));

        // A huge count must be rejected before anything is allocated for it.
        data[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(EmbeddedSignature::from_bytes(&data).unwrap_err().is_malformed());
    }

    #[test]
    fn truncated_header() {
        let data = hex::decode("fade0cc000").unwrap();
        assert!(matches!(
            EmbeddedSignature::from_bytes(&data),
            Err(CodeSignatureError::Scroll(_))
        ));
    }

    #[test]
    fn malformed_entry_does_not_abort_siblings() {
        let mut data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[
                (CodeSigningSlot::Entitlements, entitlements_blob("<dict/>")),
                (CodeSigningSlot::Signature, blob_wrapper(b"cms")),
                (CodeSigningSlot::Ticket, blob_wrapper(b"ticket")),
            ],
        );

        // Point the 2nd entry past the end of the SuperBlob.
        let len = data.len() as u32;
        data[24..28].copy_from_slice(&(len + 4).to_be_bytes());
        // Make the 3rd entry's blob claim more data than exists.
        let third = u32::from_be_bytes(data[32..36].try_into().unwrap()) as usize;
        data[third + 4..third + 8].copy_from_slice(&0x1000u32.to_be_bytes());

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        assert_eq!(sig.index.len(), 3);
        assert_eq!(sig.blobs.len(), 1);
        assert_eq!(sig.blobs[0].slot, CodeSigningSlot::Entitlements);

        let malformed = sig.malformed_entries();
        assert_eq!(malformed.len(), 2);
        assert_eq!(malformed[0].index, 1);
        assert_eq!(malformed[0].slot, CodeSigningSlot::Signature);
        assert!(matches!(
            malformed[0].error,
            CodeSignatureError::BlobOffsetOutOfBounds { .. }
        ));
        assert_eq!(malformed[1].slot, CodeSigningSlot::Ticket);
        assert!(matches!(
            malformed[1].error,
            CodeSignatureError::BlobLengthOutOfBounds { length: 0x1000, .. }
        ));

        let parsed = sig.parse_blobs();
        assert_eq!(parsed.len(), 3);
        assert!(parsed[0].is_ok());
        assert!(parsed[1].is_err());
        assert!(parsed[2].is_err());

        // Accessors for the bad slot surface the error rather than pretending it is absent.
        assert!(sig.signature_data().is_err());
        assert!(sig.entitlements().unwrap().is_some());
    }

    #[test]
    fn offset_inside_index() {
        let mut data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[(CodeSigningSlot::CodeDirectory, blob_wrapper(b"x"))],
        );
        data[16..20].copy_from_slice(&12u32.to_be_bytes());

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        assert!(sig.blobs.is_empty());
        assert!(matches!(
            sig.code_directory(),
            Err(CodeSignatureError::BlobOffsetInsideIndex { offset: 12, .. })
        ));
    }

    #[test]
    fn wrong_magic_in_slot() {
        let data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[(CodeSigningSlot::CodeDirectory, entitlements_blob("<dict/>"))],
        );

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        assert!(matches!(
            sig.code_directory(),
            Err(CodeSignatureError::BadMagic("code directory blob"))
        ));
    }

    #[test]
    fn unknown_magic_is_other_blob() {
        let mut blob: Vec<u8> = vec![];
        blob.iowrite_with(0xdeadbeefu32, scroll::BE).unwrap();
        blob.iowrite_with(10u32, scroll::BE).unwrap();
        blob.extend_from_slice(b"hi");

        let data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[(CodeSigningSlot::Unknown(0x42), blob)],
        );
        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        let parsed = sig.blobs[0].clone().into_parsed_blob().unwrap();

        assert_eq!(parsed.blob_entry.slot, CodeSigningSlot::Unknown(0x42));
        assert_eq!(parsed.blob.magic_value(), CodeSigningMagic::Unknown(0xdeadbeef));
        match parsed.blob {
            BlobData::Other(other) => {
                assert_eq!(other.magic, 0xdeadbeef);
                assert_eq!(other.payload(), b"hi");
            }
            _ => panic!("expected other blob"),
        }
    }

    #[test]
    fn nested_signature() {
        let inner = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[(CodeSigningSlot::Entitlements, entitlements_blob("<dict/>"))],
        );
        let outer = superblob(
            CodeSigningMagic::DetachedSignature,
            &[(CodeSigningSlot::Unknown(7 << 24), inner.clone())],
        );

        let sig = EmbeddedSignature::from_bytes(&outer).unwrap();
        let parsed = sig.blobs[0].clone().into_parsed_blob().unwrap();
        match parsed.blob {
            BlobData::EmbeddedSignature(blob) => {
                assert_eq!(blob.blob_bytes(), &inner[..]);
                let nested = blob.parse_signature().unwrap();
                assert!(nested.entitlements().unwrap().is_some());
            }
            _ => panic!("expected embedded signature blob"),
        }
    }

    #[test]
    fn blob_digest_covers_header() {
        let blob = entitlements_blob("<dict/>");
        let data = superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[(CodeSigningSlot::Entitlements, blob.clone())],
        );

        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        let entry = sig.find_slot(CodeSigningSlot::Entitlements).unwrap();
        assert_eq!(
            entry.digest_with(DigestType::Sha256).unwrap(),
            DigestType::Sha256.digest_data(&blob).unwrap()
        );
        assert_eq!(entry.payload(), b"<dict/>");
    }
}
