// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Functionality related to hashing code.

One aspect of Apple code signing is binary integrity verification.

The signature data contains cryptographic hashes of content of the thing
being signed. Different regions of the binary are split into pages (e.g.
of 4096 bytes). The cryptographic hash of each page is computed and the
hashes are written to the code directory. When the binary is loaded, as a
page is brought into memory its hash is verified against what is inside
the binary.

The code directory itself is identified by its *cdhash*: the digest of
the code directory blob exactly as stored, truncated to 20 bytes.
*/

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        embedded_signature::{Blob, DigestType},
        error::CodeSignatureError,
    },
    serde::{Serialize, Serializer},
    std::fmt::{Display, Formatter},
};

/// Size in bytes of a cdhash.
pub const CDHASH_LEN: usize = 20;

/// A code directory hash.
///
/// This is the identity fingerprint of a signature.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CdHash([u8; CDHASH_LEN]);

impl CdHash {
    pub fn as_bytes(&self) -> &[u8; CDHASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; CDHASH_LEN]> for CdHash {
    fn from(v: [u8; CDHASH_LEN]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for CdHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for CdHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for CdHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("CdHash({})", self.to_hex()))
    }
}

impl Serialize for CdHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Digest data with the full, untruncated output of `hash`'s algorithm.
pub fn full_digest(data: &[u8], hash: DigestType) -> Result<Vec<u8>, CodeSignatureError> {
    let mut hasher = hash.as_hasher()?;
    hasher.update(data);

    Ok(hasher.finish().as_ref().to_vec())
}

/// Compute the cdhash of raw code directory bytes.
///
/// `data` must be the code directory blob exactly as stored, header
/// included. Every supported algorithm emits at least 20 bytes.
pub fn compute_cdhash(data: &[u8], hash: DigestType) -> Result<CdHash, CodeSignatureError> {
    let digest = full_digest(data, hash)?;

    let mut res = [0u8; CDHASH_LEN];
    res.copy_from_slice(&digest[0..CDHASH_LEN]);

    Ok(CdHash(res))
}

/// Compute paged hashes.
///
/// This function takes a reference to data, chunks it into segments of `page_size`
/// and then hashes it with the specified algorithm, producing a vector of binary hashes.
/// The final page may be short and is never padded.
///
/// A `page_size` of `None` treats all of `data` as a single page.
pub fn paged_digests(
    data: &[u8],
    hash: DigestType,
    page_size: Option<usize>,
) -> Result<Vec<Vec<u8>>, CodeSignatureError> {
    match page_size {
        Some(page_size) => data
            .chunks(page_size.max(1))
            .map(|chunk| hash.digest_data(chunk))
            .collect::<Result<Vec<_>, CodeSignatureError>>(),
        None if data.is_empty() => Ok(vec![]),
        None => Ok(vec![hash.digest_data(data)?]),
    }
}

impl<'a> CodeDirectoryBlob<'a> {
    /// Compute the cdhash of this code directory.
    ///
    /// The stored bytes are digested with the directory's own hash type.
    pub fn cdhash(&self) -> Result<CdHash, CodeSignatureError> {
        compute_cdhash(self.blob_bytes(), self.hash_type)
    }

    /// The untruncated digest of this code directory.
    pub fn full_digest(&self) -> Result<Vec<u8>, CodeSignatureError> {
        full_digest(self.blob_bytes(), self.hash_type)
    }
}
