// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::embedded_signature::{CodeSigningSlot, DigestType},
    thiserror::Error,
};

/// Coarse classification of a [CodeSignatureError].
///
/// Callers that only want to know *what went wrong* without matching on
/// every detailed variant can switch on this.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Structural violation: bad magic, out-of-bounds offset or length, truncated data.
    Malformed,
    /// A code directory version newer than any known field group.
    UnsupportedVersion,
    /// A hash type outside the known enumeration (or no hash at all).
    UnsupportedHashType,
    /// One or more computed digests differ from the recorded ones.
    HashMismatch,
    /// The signed image byte source failed.
    Source,
    /// Verification was interrupted by the caller.
    Cancelled,
}

/// Unified error type for code signature decoding and verification.
#[derive(Debug, Error)]
pub enum CodeSignatureError {
    #[error("I/O error reading signed image: {0}")]
    Io(#[from] std::io::Error),

    #[error("data structure parse error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("bad header magic in {0}")]
    BadMagic(&'static str),

    #[error("SuperBlob length {length} exceeds available data ({available} bytes)")]
    SuperblobLengthOutOfBounds { length: u32, available: usize },

    #[error("SuperBlob index with {count} entries does not fit in length {length}")]
    SuperblobIndexOutOfBounds { count: u32, length: u32 },

    #[error("blob offset {offset} for slot {slot:?} is outside SuperBlob of length {length}")]
    BlobOffsetOutOfBounds {
        slot: CodeSigningSlot,
        offset: u32,
        length: u32,
    },

    #[error("blob offset {offset} for slot {slot:?} points into the SuperBlob index")]
    BlobOffsetInsideIndex { slot: CodeSigningSlot, offset: u32 },

    #[error("blob declares length {0} which is shorter than its own header")]
    BlobLengthTooShort(usize),

    #[error("blob declares length {length} but only {available} bytes are available")]
    BlobLengthOutOfBounds { length: usize, available: usize },

    #[error("signature data has no code directory")]
    CodeDirectoryMissing,

    #[error("code directory data is malformed: {0}")]
    CodeDirectoryMalformed(&'static str),

    #[error("code directory hash slots span {start}..{end} outside directory length {length}")]
    CodeDirectoryHashSpanOutOfBounds { start: i64, end: i64, length: u32 },

    #[error("code directory hash size {hash_size} does not match {hash_type} (expected {expected})")]
    CodeDirectoryHashSizeMismatch {
        hash_type: DigestType,
        hash_size: u8,
        expected: usize,
    },

    #[error("malformed identifier string in code directory")]
    CodeDirectoryMalformedIdentifier,

    #[error("malformed team name string in code directory")]
    CodeDirectoryMalformedTeam,

    #[error("unsupported code directory version: 0x{0:x}")]
    CodeDirectoryUnsupportedVersion(u32),

    #[error("requirement set data is malformed: {0}")]
    RequirementSetMalformed(&'static str),

    #[error("scatter vector is malformed: {0}")]
    ScatterMalformed(&'static str),

    #[error("entitlements data not valid UTF-8: {0}")]
    EntitlementsBadUtf8(std::str::Utf8Error),

    #[error("unknown digest algorithm: {0}")]
    DigestUnknownAlgorithm(u8),

    #[error("code directory declares no digest algorithm")]
    DigestNoAlgorithm,

    #[error("signed image range {offset}+{length} is outside the image ({available} bytes)")]
    ImageRangeOutOfBounds {
        offset: u64,
        length: usize,
        available: u64,
    },

    /// Signed indices of every slot that didn't match.
    ///
    /// Slots with a differing digest, a missing digest or a digest with no
    /// content are all listed.
    #[error("digest mismatch in slot(s): {0:?}")]
    HashMismatch(Vec<i64>),

    #[error("verification cancelled after {pages_verified} pages")]
    Cancelled { pages_verified: usize },
}

impl CodeSignatureError {
    /// Obtain the [ErrorKind] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::ImageRangeOutOfBounds { .. } => ErrorKind::Source,
            Self::CodeDirectoryUnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            Self::DigestUnknownAlgorithm(_) | Self::DigestNoAlgorithm => {
                ErrorKind::UnsupportedHashType
            }
            Self::HashMismatch(_) => ErrorKind::HashMismatch,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Scroll(_)
            | Self::BadMagic(_)
            | Self::SuperblobLengthOutOfBounds { .. }
            | Self::SuperblobIndexOutOfBounds { .. }
            | Self::BlobOffsetOutOfBounds { .. }
            | Self::BlobOffsetInsideIndex { .. }
            | Self::BlobLengthTooShort(_)
            | Self::BlobLengthOutOfBounds { .. }
            | Self::CodeDirectoryMissing
            | Self::CodeDirectoryMalformed(_)
            | Self::CodeDirectoryHashSpanOutOfBounds { .. }
            | Self::CodeDirectoryHashSizeMismatch { .. }
            | Self::CodeDirectoryMalformedIdentifier
            | Self::CodeDirectoryMalformedTeam
            | Self::RequirementSetMalformed(_)
            | Self::ScatterMalformed(_)
            | Self::EntitlementsBadUtf8(_) => ErrorKind::Malformed,
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.kind() == ErrorKind::Malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            CodeSignatureError::BadMagic("code directory blob").kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            CodeSignatureError::DigestUnknownAlgorithm(42).kind(),
            ErrorKind::UnsupportedHashType
        );
        assert_eq!(
            CodeSignatureError::CodeDirectoryUnsupportedVersion(0x30000).kind(),
            ErrorKind::UnsupportedVersion
        );
        assert_eq!(
            CodeSignatureError::HashMismatch(vec![-5, 1]).kind(),
            ErrorKind::HashMismatch
        );
        assert!(CodeSignatureError::ScatterMalformed("no sentinel").is_malformed());
    }

    #[test]
    fn hash_mismatch_message() {
        let e = CodeSignatureError::HashMismatch(vec![-2, 0, 3]);
        assert_eq!(e.to_string(), "digest mismatch in slot(s): [-2, 0, 3]");
    }
}
