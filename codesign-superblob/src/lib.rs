// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding and digest verification of Apple code signature data.
//!
//! Code signatures on Apple platforms are stored as a `SuperBlob`: a
//! big-endian container of typed blobs addressed by slot. The most important
//! blob is the *code directory*, which records digests of every page of the
//! signed image plus digests of the other blobs (*special slots*).
//!
//! # Features and Capabilities
//!
//! This crate can:
//!
//! * Parse `SuperBlob` headers and indices, resolving each entry to a bounded
//!   slice of the signature data. (See [EmbeddedSignature].)
//! * Decode individual blobs into Rust structs. (See [BlobData],
//!   [CodeDirectoryBlob] and [RequirementSetBlob].) A malformed blob is
//!   reported on its own and never prevents access to its siblings.
//! * Decode every known code directory version, including scatter vectors,
//!   team identifiers, 64-bit code limits, executable segment information,
//!   runtime versions and linkage fields.
//! * Compute the *cdhash* identity of a code directory. (See [CdHash].)
//! * Verify code page digests against the signed image, reading from memory
//!   or any [std::io::Read] + [std::io::Seek] source. (See [PageHashVerifier]
//!   and [SignedImageSource].)
//! * Verify special slot digests against blobs and caller supplied content.
//! * Report all problems with a signature in one pass. (See
//!   [SignatureVerifier].)
//!
//! This crate does not:
//!
//! * Locate signature data inside Mach-O or other container formats. Callers
//!   provide the raw `SuperBlob` bytes.
//! * Create or write signatures.
//! * Validate the CMS signature or certificate chain.
//! * Evaluate code requirement expressions. Requirement blobs are exposed as
//!   raw bytes.
//!
//! # Getting Started
//!
//! [EmbeddedSignature::from_bytes] parses signature data.
//! [EmbeddedSignature::code_directory] obtains the primary code directory.
//! [SignatureVerifier::verify] checks everything against the signed image
//! and returns a list of [VerificationProblem]s.
//!
//! All parsing borrows from the input. Parsed structures are immutable and
//! can be shared across threads.

mod code_directory;
pub use code_directory::*;
mod code_hash;
pub use code_hash::*;
pub mod code_requirement;
pub use code_requirement::*;
pub mod embedded_signature;
pub use embedded_signature::*;
mod error;
pub use error::*;
mod image_source;
pub use image_source::*;
pub mod scatter;
pub use scatter::*;
mod settings;
pub use settings::*;
mod verify;
pub use verify::*;

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn parsed_structures_are_shareable() {
        assert_send_sync::<EmbeddedSignature<'static>>();
        assert_send_sync::<CodeDirectoryBlob<'static>>();
        assert_send_sync::<BlobData<'static>>();
        assert_send_sync::<DigestVerification>();
        assert_send_sync::<VerificationProblem>();
        assert_send_sync::<ReadSeekSource<std::io::Cursor<Vec<u8>>>>();
    }

    #[test]
    fn verify_from_many_threads() {
        let image = testutil::image_bytes(4096 * 4);
        let fixture = testutil::CodeDirectoryFixture::sha256_pages(&image, 12);
        let data = testutil::superblob(
            CodeSigningMagic::EmbeddedSignature,
            &[(CodeSigningSlot::CodeDirectory, fixture.build())],
        );
        let sig = EmbeddedSignature::from_bytes(&data).unwrap();
        let cd = sig.code_directory().unwrap().unwrap();

        std::thread::scope(|scope| {
            let handles = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        PageHashVerifier::new(&cd, &image)
                            .verify_code_pages()
                            .unwrap()
                            .passed()
                    })
                })
                .collect::<Vec<_>>();

            for handle in handles {
                assert!(handle.join().unwrap());
            }
        });
    }
}
