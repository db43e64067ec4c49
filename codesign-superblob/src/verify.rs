// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code signature digest verification.
//!
//! This module recomputes the digests recorded in code directories and
//! compares them with what is stored.
//!
//! [PageHashVerifier] digests the pages of the signed image covered by a
//! code directory. Special slot digests are checked by
//! [CodeDirectoryBlob::verify_special_slot] and
//! [CodeDirectoryBlob::verify_embedded_special_slots]. [SignatureVerifier]
//! runs all of these over every code directory in a signature and reports
//! [VerificationProblem]s.
//!
//! # Verification Caveats
//!
//! **Verification performed by this code will vary from what Apple tools
//! do. Do not use successful verification from this code as validation that
//! Apple software will accept a signature.**
//!
//! Only digests are verified. The CMS signature over the code directory is
//! not examined and code requirements are not evaluated.

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        embedded_signature::{
            BlobEntryError, CodeSigningSlot, Digest, DigestType, EmbeddedSignature,
        },
        error::CodeSignatureError,
        image_source::SignedImageSource,
        settings::VerificationSettings,
    },
    log::{debug, info, warn},
    serde::{Serialize, Serializer},
    std::sync::atomic::{AtomicBool, Ordering},
    subtle::ConstantTimeEq,
};

/// Special slots at or above this value are not expected to carry placeholder digests.
const SPECIAL_SLOT_PLACEHOLDER_LIMIT: u32 = 32;

/// The result of checking one hash slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOutcome {
    /// The computed digest equals the recorded one.
    Match,
    /// The computed digest differs from the recorded one.
    Mismatch,
    /// Content exists but the code directory records no digest for it.
    MissingEntry,
    /// The code directory records a digest for content that doesn't exist.
    ExtraEntry,
}

/// Verification record for a single hash slot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SlotVerification {
    /// Signed slot index. Code pages are `>= 0`, special slot `k` is `-k`.
    pub index: i64,
    pub outcome: SlotOutcome,
    /// The digest stored in the code directory.
    pub recorded: Option<Digest<'static>>,
    /// The digest computed from content.
    pub computed: Option<Digest<'static>>,
}

impl SlotVerification {
    fn compare(index: i64, recorded: Option<&Digest<'_>>, computed: Vec<u8>) -> Self {
        let (outcome, recorded) = match recorded {
            Some(recorded) => {
                let equal: bool = recorded.data.as_ref().ct_eq(computed.as_slice()).into();

                if equal {
                    (SlotOutcome::Match, Some(recorded.to_owned()))
                } else {
                    (SlotOutcome::Mismatch, Some(recorded.to_owned()))
                }
            }
            None => (SlotOutcome::MissingEntry, None),
        };

        Self {
            index,
            outcome,
            recorded,
            computed: Some(computed.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == SlotOutcome::Match
    }

    /// The special slot this record is for, if it isn't a code page.
    pub fn special_slot(&self) -> Option<CodeSigningSlot> {
        if self.index < 0 {
            u32::try_from(self.index.unsigned_abs())
                .ok()
                .map(CodeSigningSlot::from)
        } else {
            None
        }
    }
}

/// Verification records for a set of hash slots.
///
/// Every slot is checked. Failures never stop verification of other slots.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DigestVerification {
    pub slots: Vec<SlotVerification>,
}

impl DigestVerification {
    /// Whether every checked slot matched.
    pub fn passed(&self) -> bool {
        self.slots.iter().all(|s| s.passed())
    }

    /// Records for slots that didn't match, whatever the reason.
    pub fn failures(&self) -> impl Iterator<Item = &SlotVerification> {
        self.slots.iter().filter(|s| !s.passed())
    }

    /// Records for slots whose computed digest differs from the recorded one.
    pub fn mismatches(&self) -> Vec<&SlotVerification> {
        self.slots
            .iter()
            .filter(|s| s.outcome == SlotOutcome::Mismatch)
            .collect()
    }

    /// Indices of every slot that didn't match.
    pub fn failing_indices(&self) -> Vec<i64> {
        self.failures().map(|s| s.index).collect()
    }

    pub fn extend(&mut self, other: DigestVerification) {
        self.slots.extend(other.slots);
    }

    /// Convert into a `Result`, failing with every failing slot index.
    ///
    /// [CodeSignatureError::HashMismatch] lists the slots of [Self::failures],
    /// so missing and extra entries appear next to differing digests. Use
    /// [Self::mismatches] for differing digests only.
    pub fn into_result(self) -> Result<Self, CodeSignatureError> {
        if self.passed() {
            Ok(self)
        } else {
            Err(CodeSignatureError::HashMismatch(self.failing_indices()))
        }
    }
}

/// A region of the signed image and the code slot whose digest covers it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct CodePage {
    pub slot: u64,
    pub offset: u64,
    pub length: usize,
}

/// Verifies code page digests of a code directory against a signed image.
pub struct PageHashVerifier<'v, 'a, S: SignedImageSource + ?Sized> {
    code_directory: &'v CodeDirectoryBlob<'a>,
    source: &'v S,
    cancel: Option<&'v AtomicBool>,
}

impl<'v, 'a, S: SignedImageSource + ?Sized> PageHashVerifier<'v, 'a, S> {
    pub fn new(code_directory: &'v CodeDirectoryBlob<'a>, source: &'v S) -> Self {
        Self {
            code_directory,
            source,
            cancel: None,
        }
    }

    /// Abort verification when `flag` is raised.
    ///
    /// The flag is checked before each page is read.
    pub fn with_cancellation(mut self, flag: &'v AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Obtain the pages covered by the code directory, in verification order.
    ///
    /// Pages partition `[0, code limit)`. The final page may be short. With a
    /// scatter vector, record `(count, base, target)` maps slot `base + j` to
    /// the page at `target + j * page size`, clamped to the code limit. Pages
    /// starting at or beyond the code limit are dropped.
    pub fn pages(&self) -> Result<Box<dyn Iterator<Item = CodePage> + 'v>, CodeSignatureError> {
        let cd: &'v CodeDirectoryBlob<'a> = self.code_directory;
        let limit = cd.effective_code_limit();
        let page_size = match cd.page_size() {
            Some(size) => size as u64,
            None => limit.max(1),
        };

        if usize::try_from(page_size.min(limit)).is_err() {
            return Err(CodeSignatureError::CodeDirectoryMalformed(
                "page does not fit in memory",
            ));
        }

        let clamp = move |slot: u64, offset: u64| {
            if offset >= limit {
                None
            } else {
                Some(CodePage {
                    slot,
                    offset,
                    length: page_size.min(limit - offset) as usize,
                })
            }
        };

        match cd.scatter_vector() {
            Some(scatter) => Ok(Box::new(
                scatter
                    .pages(page_size, limit)
                    .filter_map(move |(slot, offset)| clamp(slot, offset)),
            )),
            None => {
                let count = limit / page_size + u64::from(limit % page_size != 0);

                Ok(Box::new(
                    (0..count).filter_map(move |i| clamp(i, i * page_size)),
                ))
            }
        }
    }

    /// Digest every code page and compare with the recorded code slots.
    ///
    /// All pages are checked. Pages with no recorded slot yield
    /// [SlotOutcome::MissingEntry] and recorded slots with no page yield
    /// [SlotOutcome::ExtraEntry].
    pub fn verify_code_pages(&self) -> Result<DigestVerification, CodeSignatureError> {
        let cd = self.code_directory;
        let limit = cd.effective_code_limit();
        let available = self.source.len()?;

        if limit > available {
            return Err(CodeSignatureError::ImageRangeOutOfBounds {
                offset: 0,
                length: usize::try_from(limit).unwrap_or(usize::MAX),
                available,
            });
        }

        let mut covered = vec![false; cd.code_hashes.len()];
        let mut slots = vec![];
        let mut pages_verified = 0;

        for page in self.pages()? {
            if self.cancelled() {
                return Err(CodeSignatureError::Cancelled { pages_verified });
            }

            let data = self.source.read_range(page.offset, page.length)?;
            let computed = cd.hash_type.digest_data(&data)?;

            let position = usize::try_from(page.slot).ok();
            let recorded = position.and_then(|i| cd.code_hashes.get(i));
            if let Some(seen) = position.and_then(|i| covered.get_mut(i)) {
                *seen = true;
            }

            let index = i64::try_from(page.slot).unwrap_or(i64::MAX);
            let result = SlotVerification::compare(index, recorded, computed);

            match result.outcome {
                SlotOutcome::Mismatch => warn!("code digest mismatch for slot {}", index),
                SlotOutcome::MissingEntry => {
                    warn!("code directory has no digest for page at slot {}", index)
                }
                _ => {}
            }

            slots.push(result);
            pages_verified += 1;
        }

        for ((i, digest), seen) in cd.code_hashes.iter().enumerate().zip(covered) {
            if !seen {
                warn!("code directory has digest for slot {} beyond signed pages", i);

                slots.push(SlotVerification {
                    index: i as i64,
                    outcome: SlotOutcome::ExtraEntry,
                    recorded: Some(digest.to_owned()),
                    computed: None,
                });
            }
        }

        debug!(
            "verified {} code pages of {} ({})",
            pages_verified,
            cd.identifier(),
            cd.hash_type
        );

        Ok(DigestVerification { slots })
    }
}

impl<'a> CodeDirectoryBlob<'a> {
    /// Verify a special slot digest against caller supplied payload bytes.
    ///
    /// `payload` is digested as is. For blob-backed slots this is the
    /// whole blob including its header. For external content slots such as
    /// [CodeSigningSlot::Info] it is the external file content.
    pub fn verify_special_slot(
        &self,
        slot: CodeSigningSlot,
        payload: &[u8],
    ) -> Result<SlotVerification, CodeSignatureError> {
        let computed = self.hash_type.digest_data(payload)?;
        let result = SlotVerification::compare(
            -(u32::from(slot) as i64),
            self.special_slot_digest(slot),
            computed,
        );

        if !result.passed() {
            warn!("special slot digest for {:?} does not verify", slot);
        }

        Ok(result)
    }

    /// Verify special slot digests against blobs in the same signature.
    ///
    /// Blobs in low numbered slots without a recorded digest yield
    /// [SlotOutcome::MissingEntry]. Recorded digests for slots with no blob
    /// yield [SlotOutcome::ExtraEntry], except for all-zero placeholders below
    /// the highest recorded slot. Slots with external content are skipped.
    pub fn verify_embedded_special_slots(
        &self,
        signature: &EmbeddedSignature<'_>,
    ) -> Result<DigestVerification, CodeSignatureError> {
        let mut slots = vec![];

        // The code directory doesn't have a digest because one cannot hash self.
        for entry in &signature.blobs {
            let slot = entry.slot;

            if u32::from(slot) < SPECIAL_SLOT_PLACEHOLDER_LIMIT
                && slot != CodeSigningSlot::CodeDirectory
                && !self.special_hashes.contains_key(&slot)
            {
                warn!("no special slot digest for {:?}", slot);

                slots.push(SlotVerification {
                    index: -(u32::from(slot) as i64),
                    outcome: SlotOutcome::MissingEntry,
                    recorded: None,
                    computed: Some(entry.digest_with(self.hash_type)?.into()),
                });
            }
        }

        let max_slot = self
            .special_hashes
            .keys()
            .map(|slot| u32::from(*slot))
            .filter(|slot| *slot < SPECIAL_SLOT_PLACEHOLDER_LIMIT)
            .max()
            .unwrap_or(0);

        for (slot, recorded) in &self.special_hashes {
            if slot.has_external_content() {
                continue;
            }

            let index = -(u32::from(*slot) as i64);

            match signature.find_slot_entry(*slot) {
                Ok(Some(entry)) => {
                    let computed = entry.digest_with(self.hash_type)?;
                    let result = SlotVerification::compare(index, Some(recorded), computed);

                    if !result.passed() {
                        warn!("special slot digest mismatch for {:?}", slot);
                    }

                    slots.push(result);
                }
                Ok(None) => {
                    // Null digests exist as placeholders when there is a higher
                    // numbered slot present.
                    if u32::from(*slot) >= max_slot || !recorded.is_null() {
                        warn!("special slot digest for {:?} has no blob", slot);

                        slots.push(SlotVerification {
                            index,
                            outcome: SlotOutcome::ExtraEntry,
                            recorded: Some(recorded.to_owned()),
                            computed: None,
                        });
                    }
                }
                Err(e) => {
                    warn!("unable to digest blob for {:?}: {}", slot, e);

                    slots.push(SlotVerification {
                        index,
                        outcome: SlotOutcome::Mismatch,
                        recorded: Some(recorded.to_owned()),
                        computed: None,
                    });
                }
            }
        }

        Ok(DigestVerification { slots })
    }
}

/// Context for a verification issue.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct VerificationContext {
    /// The code directory slot the problem was found in.
    pub code_directory: Option<CodeSigningSlot>,
}

fn serialize_display<T: std::fmt::Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Describes a problem with verification.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum VerificationProblemType {
    MalformedBlob(#[serde(serialize_with = "serialize_display")] BlobEntryError),
    NoCodeDirectory,
    CodeDirectoryError(#[serde(serialize_with = "serialize_display")] CodeSignatureError),
    UnsupportedVersion(u32),
    InsecureDigestAlgorithm(DigestType),
    CodeDigestError(#[serde(serialize_with = "serialize_display")] CodeSignatureError),
    CodeDigest(SlotVerification),
    SlotDigestError(#[serde(serialize_with = "serialize_display")] CodeSignatureError),
    SlotDigest(SlotVerification),
}

#[derive(Debug, Serialize)]
pub struct VerificationProblem {
    pub context: VerificationContext,
    pub problem: VerificationProblemType,
}

fn describe_slot(what: &str, slot: &SlotVerification) -> String {
    let hex = |d: &Option<Digest<'static>>| {
        d.as_ref()
            .map(|d| d.as_hex())
            .unwrap_or_else(|| "<none>".to_string())
    };

    match slot.outcome {
        SlotOutcome::Match => format!("{} digest for slot {} matches", what, slot.index),
        SlotOutcome::Mismatch => format!(
            "{} digest mismatch for slot {}; recorded digest {}, actual {}",
            what,
            slot.index,
            hex(&slot.recorded),
            hex(&slot.computed)
        ),
        SlotOutcome::MissingEntry => format!(
            "{} digest missing entry for slot {} with digest {}",
            what,
            slot.index,
            hex(&slot.computed)
        ),
        SlotOutcome::ExtraEntry => format!(
            "{} digest contains extra entry for slot {} with digest {}",
            what,
            slot.index,
            hex(&slot.recorded)
        ),
    }
}

impl std::fmt::Display for VerificationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match &self.problem {
            VerificationProblemType::MalformedBlob(e) => format!("malformed blob: {}", e),
            VerificationProblemType::NoCodeDirectory => "no code directory".to_string(),
            VerificationProblemType::CodeDirectoryError(e) => {
                format!("error parsing code directory: {}", e)
            }
            VerificationProblemType::UnsupportedVersion(version) => {
                format!("unsupported code directory version 0x{:x}", version)
            }
            VerificationProblemType::InsecureDigestAlgorithm(hash_type) => {
                format!(
                    "insecure digest algorithm used in code directory: {}",
                    hash_type
                )
            }
            VerificationProblemType::CodeDigestError(e) => {
                format!("error computing code digests: {}", e)
            }
            VerificationProblemType::CodeDigest(slot) => describe_slot("code", slot),
            VerificationProblemType::SlotDigestError(e) => {
                format!("error computing slot digest: {}", e)
            }
            VerificationProblemType::SlotDigest(slot) => describe_slot("special slot", slot),
        };

        match &self.context.code_directory {
            Some(slot) => f.write_fmt(format_args!("{:?}: {}", slot, message)),
            None => f.write_str(&message),
        }
    }
}

/// Verifies all digests of an embedded signature.
pub struct SignatureVerifier<'v> {
    settings: VerificationSettings,
    cancel: Option<&'v AtomicBool>,
    external_payloads: Vec<(CodeSigningSlot, &'v [u8])>,
}

impl<'v> SignatureVerifier<'v> {
    pub fn new(settings: VerificationSettings) -> Self {
        Self {
            settings,
            cancel: None,
            external_payloads: vec![],
        }
    }

    pub fn settings(&self) -> &VerificationSettings {
        &self.settings
    }

    /// Abort page verification when `flag` is raised.
    pub fn with_cancellation(mut self, flag: &'v AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Register content for a special slot that isn't stored in the signature.
    ///
    /// This is typically the `Info.plist` or the resources seal.
    pub fn with_external_payload(mut self, slot: CodeSigningSlot, data: &'v [u8]) -> Self {
        self.external_payloads.push((slot, data));
        self
    }

    /// Verify a signature against the signed image it belongs to.
    ///
    /// Returns a vector of problems detected. An empty vector means no
    /// problems were found. The only error is cancellation.
    pub fn verify<S: SignedImageSource + ?Sized>(
        &self,
        signature: &EmbeddedSignature<'_>,
        source: &S,
    ) -> Result<Vec<VerificationProblem>, CodeSignatureError> {
        let mut problems = vec![];

        // Code directory slots report their own parse errors below.
        for error in signature.malformed_entries() {
            if !error.slot.is_code_directory() {
                problems.push(VerificationProblem {
                    context: VerificationContext::default(),
                    problem: VerificationProblemType::MalformedBlob(error),
                });
            }
        }

        let mut directories = vec![];

        match signature.code_directory() {
            Ok(Some(cd)) => directories.push((CodeSigningSlot::CodeDirectory, cd)),
            Ok(None) => problems.push(VerificationProblem {
                context: VerificationContext::default(),
                problem: VerificationProblemType::NoCodeDirectory,
            }),
            Err(e) => problems.push(VerificationProblem {
                context: VerificationContext {
                    code_directory: Some(CodeSigningSlot::CodeDirectory),
                },
                problem: VerificationProblemType::CodeDirectoryError(e),
            }),
        }

        if self.settings.verify_alternate_code_directories() {
            for (slot, res) in signature.alternate_code_directories() {
                match res {
                    Ok(cd) => directories.push((slot, cd)),
                    Err(e) => problems.push(VerificationProblem {
                        context: VerificationContext {
                            code_directory: Some(slot),
                        },
                        problem: VerificationProblemType::CodeDirectoryError(e),
                    }),
                }
            }
        }

        for (slot, cd) in &directories {
            problems.extend(self.verify_code_directory(signature, cd, *slot, source)?);
        }

        info!(
            "verified {} code directories; {} problems",
            directories.len(),
            problems.len()
        );

        Ok(problems)
    }

    fn verify_code_directory<S: SignedImageSource + ?Sized>(
        &self,
        signature: &EmbeddedSignature<'_>,
        cd: &CodeDirectoryBlob<'_>,
        slot: CodeSigningSlot,
        source: &S,
    ) -> Result<Vec<VerificationProblem>, CodeSignatureError> {
        let context = VerificationContext {
            code_directory: Some(slot),
        };
        let problem = |problem| VerificationProblem {
            context: context.clone(),
            problem,
        };

        let mut problems = vec![];

        if cd.has_unknown_version() && self.settings.reject_unknown_versions() {
            problems.push(problem(VerificationProblemType::UnsupportedVersion(
                cd.version,
            )));

            // The layout can't be trusted, so don't verify anything else.
            return Ok(problems);
        }

        if cd.hash_type == DigestType::Sha1 && !self.settings.allow_sha1_code_directories() {
            problems.push(problem(VerificationProblemType::InsecureDigestAlgorithm(
                cd.hash_type,
            )));
        }

        let mut verifier = PageHashVerifier::new(cd, source);
        if let Some(flag) = self.cancel {
            verifier = verifier.with_cancellation(flag);
        }

        match verifier.verify_code_pages() {
            Ok(verification) => problems.extend(
                verification
                    .failures()
                    .cloned()
                    .map(|s| problem(VerificationProblemType::CodeDigest(s))),
            ),
            Err(e @ CodeSignatureError::Cancelled { .. }) => return Err(e),
            Err(e) => problems.push(problem(VerificationProblemType::CodeDigestError(e))),
        }

        if self.settings.verify_special_slots() {
            match cd.verify_embedded_special_slots(signature) {
                Ok(verification) => problems.extend(
                    verification
                        .failures()
                        .cloned()
                        .map(|s| problem(VerificationProblemType::SlotDigest(s))),
                ),
                Err(e) => problems.push(problem(VerificationProblemType::SlotDigestError(e))),
            }

            for (slot, payload) in &self.external_payloads {
                match cd.verify_special_slot(*slot, payload) {
                    Ok(result) if !result.passed() => {
                        problems.push(problem(VerificationProblemType::SlotDigest(result)))
                    }
                    Ok(_) => {}
                    Err(e) => problems.push(problem(VerificationProblemType::SlotDigestError(e))),
                }
            }
        }

        Ok(problems)
    }
}
