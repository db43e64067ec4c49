// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access to the bytes of a signed image.
//!
//! Page digests cover the original image bytes up to the code limit. Those
//! bytes come from whatever holds the image: an in-memory buffer or a file.

use {
    crate::error::CodeSignatureError,
    std::{
        borrow::Cow,
        io::{Read, Seek, SeekFrom},
        sync::Mutex,
    },
};

/// A byte-range reader over a signed image.
pub trait SignedImageSource: Sync {
    /// Total size of the image in bytes.
    fn len(&self) -> Result<u64, CodeSignatureError>;

    fn is_empty(&self) -> Result<bool, CodeSignatureError> {
        Ok(self.len()? == 0)
    }

    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// A range that isn't fully inside the image is an error.
    fn read_range(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>, CodeSignatureError>;
}

fn check_range(offset: u64, length: usize, available: u64) -> Result<(), CodeSignatureError> {
    match offset.checked_add(length as u64) {
        Some(end) if end <= available => Ok(()),
        _ => Err(CodeSignatureError::ImageRangeOutOfBounds {
            offset,
            length,
            available,
        }),
    }
}

impl SignedImageSource for [u8] {
    fn len(&self) -> Result<u64, CodeSignatureError> {
        Ok(<[u8]>::len(self) as u64)
    }

    fn read_range(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>, CodeSignatureError> {
        check_range(offset, length, <[u8]>::len(self) as u64)?;

        let start = offset as usize;
        Ok(Cow::Borrowed(&self[start..start + length]))
    }
}

impl SignedImageSource for Vec<u8> {
    fn len(&self) -> Result<u64, CodeSignatureError> {
        SignedImageSource::len(self.as_slice())
    }

    fn read_range(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>, CodeSignatureError> {
        self.as_slice().read_range(offset, length)
    }
}

/// A [SignedImageSource] backed by a [Read] + [Seek] reader, such as a file.
///
/// Reads seek and copy under a lock, so a single reader can serve
/// concurrent callers.
pub struct ReadSeekSource<R: Read + Seek + Send> {
    reader: Mutex<R>,
    len: u64,
}

impl<R: Read + Seek + Send> ReadSeekSource<R> {
    /// Construct an instance, seeking to the end to learn the image size.
    pub fn new(mut reader: R) -> Result<Self, CodeSignatureError> {
        let len = reader.seek(SeekFrom::End(0))?;

        Ok(Self {
            reader: Mutex::new(reader),
            len,
        })
    }

    /// Obtain the wrapped reader.
    pub fn into_inner(self) -> Result<R, CodeSignatureError> {
        self.reader.into_inner().map_err(|_| poisoned())
    }
}

fn poisoned() -> CodeSignatureError {
    CodeSignatureError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "image reader lock poisoned",
    ))
}

impl<R: Read + Seek + Send> SignedImageSource for ReadSeekSource<R> {
    fn len(&self) -> Result<u64, CodeSignatureError> {
        Ok(self.len)
    }

    fn read_range(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>, CodeSignatureError> {
        check_range(offset, length, self.len)?;

        let mut reader = self.reader.lock().map_err(|_| poisoned())?;
        reader.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; length];
        reader.read_exact(&mut buffer)?;

        Ok(Cow::Owned(buffer))
    }
}
