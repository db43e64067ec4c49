// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signature verification settings.

use serde::{Deserialize, Serialize};

/// Represents settings that influence signature verification.
///
/// The defaults verify everything verifiable and tolerate code directory
/// versions newer than the ones understood here. Settings can be loaded from
/// any serde format, with missing fields taking their default value.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct VerificationSettings {
    reject_unknown_versions: bool,
    verify_special_slots: bool,
    verify_alternate_code_directories: bool,
    allow_sha1_code_directories: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            reject_unknown_versions: false,
            verify_special_slots: true,
            verify_alternate_code_directories: true,
            allow_sha1_code_directories: false,
        }
    }
}

impl VerificationSettings {
    /// Whether code directories with an unknown newer version are rejected.
    ///
    /// When false, the fields of known versions are verified and the rest
    /// ignored.
    pub fn reject_unknown_versions(&self) -> bool {
        self.reject_unknown_versions
    }

    pub fn set_reject_unknown_versions(&mut self, value: bool) -> &mut Self {
        self.reject_unknown_versions = value;
        self
    }

    /// Whether special slot digests are checked against blobs in the signature.
    pub fn verify_special_slots(&self) -> bool {
        self.verify_special_slots
    }

    pub fn set_verify_special_slots(&mut self, value: bool) -> &mut Self {
        self.verify_special_slots = value;
        self
    }

    /// Whether alternate code directories are verified like the primary one.
    pub fn verify_alternate_code_directories(&self) -> bool {
        self.verify_alternate_code_directories
    }

    pub fn set_verify_alternate_code_directories(&mut self, value: bool) -> &mut Self {
        self.verify_alternate_code_directories = value;
        self
    }

    /// Whether SHA-1 code directories are accepted without a problem report.
    pub fn allow_sha1_code_directories(&self) -> bool {
        self.allow_sha1_code_directories
    }

    pub fn set_allow_sha1_code_directories(&mut self, value: bool) -> &mut Self {
        self.allow_sha1_code_directories = value;
        self
    }
}
