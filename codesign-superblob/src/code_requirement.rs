// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code requirement blobs.
//!
//! Requirements are expressions in a small binary language describing
//! constraints on code. This module only frames them: the requirements set
//! table is decoded and each nested requirement blob is bounded and
//! validated, but expression bytes are left uninterpreted.

use {
    crate::{
        embedded_signature::{read_and_validate_blob_header, Blob, CodeSigningMagic},
        error::CodeSignatureError,
    },
    scroll::Pread,
    serde::{Serialize, Serializer},
};

/// Denotes the type of a code requirement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RequirementType {
    /// What hosts may run on us.
    Host,
    /// What guests we may run.
    Guest,
    /// Designated requirement.
    Designated,
    /// What libraries we may link against.
    Library,
    /// What plug-ins we may load.
    Plugin,
    /// Unknown requirement type.
    Unknown(u32),
}

impl From<u32> for RequirementType {
    fn from(v: u32) -> Self {
        match v {
            1 => Self::Host,
            2 => Self::Guest,
            3 => Self::Designated,
            4 => Self::Library,
            5 => Self::Plugin,
            _ => Self::Unknown(v),
        }
    }
}

impl From<RequirementType> for u32 {
    fn from(t: RequirementType) -> Self {
        match t {
            RequirementType::Host => 1,
            RequirementType::Guest => 2,
            RequirementType::Designated => 3,
            RequirementType::Library => 4,
            RequirementType::Plugin => 5,
            RequirementType::Unknown(v) => v,
        }
    }
}

impl std::fmt::Display for RequirementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => f.write_str("host(1)"),
            Self::Guest => f.write_str("guest(2)"),
            Self::Designated => f.write_str("designated(3)"),
            Self::Library => f.write_str("library(4)"),
            Self::Plugin => f.write_str("plugin(5)"),
            Self::Unknown(v) => f.write_fmt(format_args!("unknown({})", v)),
        }
    }
}

impl Serialize for RequirementType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Represents a single code requirement blob.
#[derive(Clone, Copy)]
pub struct RequirementBlob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> for RequirementBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::Requirement)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError> {
        Ok(Self {
            data: read_and_validate_blob_header(data, Self::magic(), "requirement blob")?,
        })
    }

    fn blob_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> std::fmt::Debug for RequirementBlob<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("RequirementBlob({})", hex::encode(self.payload())))
    }
}

impl<'a> RequirementBlob<'a> {
    /// The opaque, uninterpreted requirement expression bytes.
    pub fn expression(&self) -> &'a [u8] {
        self.payload()
    }
}

/// Represents a Requirement set blob.
///
/// A Requirement set blob contains nested Requirement blobs, each tagged
/// with a [RequirementType]. Entries are kept in table order.
#[derive(Clone)]
pub struct RequirementSetBlob<'a> {
    data: &'a [u8],
    requirements: Vec<(RequirementType, RequirementBlob<'a>)>,
}

impl<'a> Blob<'a> for RequirementSetBlob<'a> {
    fn magic() -> u32 {
        u32::from(CodeSigningMagic::RequirementSet)
    }

    fn from_blob_bytes(data: &'a [u8]) -> Result<Self, CodeSignatureError> {
        let data = read_and_validate_blob_header(data, Self::magic(), "requirement set blob")?;

        // There are other blobs nested within. A u32 denotes how many there are.
        // Then there is an array of N (u32, u32) denoting the type and
        // offset of each.
        let offset = &mut 8;
        let count = data.gread_with::<u32>(offset, scroll::BE)?;

        let table_end = 12u64 + 8 * count as u64;
        if table_end > data.len() as u64 {
            return Err(CodeSignatureError::RequirementSetMalformed(
                "table extends past end of blob",
            ));
        }

        let mut requirements = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let typ = RequirementType::from(data.gread_with::<u32>(offset, scroll::BE)?);
            let requirement_offset = data.gread_with::<u32>(offset, scroll::BE)? as u64;

            if requirement_offset < table_end || requirement_offset >= data.len() as u64 {
                return Err(CodeSignatureError::RequirementSetMalformed(
                    "requirement offset out of bounds",
                ));
            }

            let blob = RequirementBlob::from_blob_bytes(&data[requirement_offset as usize..])?;

            requirements.push((typ, blob));
        }

        Ok(Self { data, requirements })
    }

    fn blob_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> std::fmt::Debug for RequirementSetBlob<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.requirements.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl<'a> RequirementSetBlob<'a> {
    /// The requirements in table order.
    pub fn requirements(&self) -> &[(RequirementType, RequirementBlob<'a>)] {
        &self.requirements
    }

    /// Find the first requirement of a given type.
    pub fn get(&self, typ: RequirementType) -> Option<&RequirementBlob<'a>> {
        self.requirements
            .iter()
            .find(|(t, _)| *t == typ)
            .map(|(_, blob)| blob)
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil::*};

    #[test]
    fn requirement_types() {
        assert_eq!(RequirementType::from(3), RequirementType::Designated);
        assert_eq!(RequirementType::from(9), RequirementType::Unknown(9));
        assert_eq!(u32::from(RequirementType::Plugin), 5);
        assert_eq!(RequirementType::Library.to_string(), "library(4)");
        assert_eq!(RequirementType::Unknown(9).to_string(), "unknown(9)");
    }

    #[test]
    fn parse_set_in_order() {
        let data = requirement_set(&[
            (3, requirement_blob(b"\x00\x00\x00\x06")),
            (1, requirement_blob(b"\x00\x00\x00\x01\x00\x00\x00\x00")),
            (42, requirement_blob(b"")),
        ]);

        let set = RequirementSetBlob::from_blob_bytes(&data).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.blob_bytes(), &data[..]);

        let types = set.requirements().iter().map(|(t, _)| *t).collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                RequirementType::Designated,
                RequirementType::Host,
                RequirementType::Unknown(42)
            ]
        );
        assert_eq!(
            set.get(RequirementType::Designated).unwrap().expression(),
            b"\x00\x00\x00\x06"
        );
        assert!(set.get(RequirementType::Guest).is_none());
        assert!(set.requirements()[2].1.expression().is_empty());
    }

    #[test]
    fn empty_set() {
        let data = empty_requirement_set();
        let set = RequirementSetBlob::from_blob_bytes(&data).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn nested_bad_magic() {
        let mut data = requirement_set(&[(3, requirement_blob(b"expr"))]);
        // Corrupt the nested requirement magic.
        data[20] = 0x00;

        assert!(matches!(
            RequirementSetBlob::from_blob_bytes(&data),
            Err(CodeSignatureError::BadMagic("requirement blob"))
        ));
    }

    #[test]
    fn nested_length_past_parent() {
        let mut data = requirement_set(&[(3, requirement_blob(b"expr"))]);
        data[24..28].copy_from_slice(&64u32.to_be_bytes());

        assert!(matches!(
            RequirementSetBlob::from_blob_bytes(&data),
            Err(CodeSignatureError::BlobLengthOutOfBounds { length: 64, .. })
        ));
    }

    #[test]
    fn table_past_end() {
        let mut data = empty_requirement_set();
        data[8..12].copy_from_slice(&1000u32.to_be_bytes());

        assert!(matches!(
            RequirementSetBlob::from_blob_bytes(&data),
            Err(CodeSignatureError::RequirementSetMalformed(_))
        ));
    }

    #[test]
    fn offset_into_table() {
        let mut data = requirement_set(&[(3, requirement_blob(b"expr"))]);
        data[16..20].copy_from_slice(&4u32.to_be_bytes());

        assert!(RequirementSetBlob::from_blob_bytes(&data)
            .unwrap_err()
            .is_malformed());
    }
}
