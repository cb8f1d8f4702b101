//! Outcome classification
//!
//! Turns the raw [`FlashSignal`] of a finished attempt into an [`Outcome`].
//!
//! Tool-driven backends report a return code, which is passed through as is.
//! Mass-storage interface firmware instead writes a failure marker file
//! (`FAIL.TXT`) to the volume after a bad copy. The marker text is matched
//! against phrase families in priority order; the first family with a phrase
//! contained in the text decides the category.

use crate::backend::FlashSignal;
use crate::outcome::{FailureCategory, Outcome};
use std::fs;
use std::path::{Path, PathBuf};

/// Failure marker phrases of one category
#[derive(Debug, Clone, Copy)]
pub struct PhraseFamily {
    /// Category assigned when a phrase matches
    pub category: FailureCategory,
    /// Phrases, matched as substrings
    pub phrases: &'static [&'static str],
}

/// DAPLink `FAIL.TXT` messages, in classification priority order
pub const DAPLINK_PHRASES: &[PhraseFamily] = &[
    PhraseFamily {
        category: FailureCategory::Stream,
        phrases: &[
            "An internal error has occurred",
            "End of stream has been reached",
            "End of stream is unknown",
        ],
    },
    PhraseFamily {
        category: FailureCategory::Transfer,
        phrases: &[
            "An error occurred during the transfer",
            "Possible mismatch between file size and size programmed",
            "File sent out of order by PC",
            "An error has occurred",
        ],
    },
    PhraseFamily {
        category: FailureCategory::Image,
        phrases: &[
            "The transfer timed out",
            "The interface firmware ABORTED programming",
            "The hex file cannot be decoded",
            "The hex file cannot be programmed",
            "The hex file you dropped isn't compatible",
            "The hex file offset load address is not correct",
            "The starting address for the bootloader update is wrong",
            "The starting address for the interface update is wrong",
            "The application file format is unknown",
        ],
    },
    PhraseFamily {
        category: FailureCategory::Interface,
        phrases: &[
            "The interface firmware FAILED to reset/halt the target MCU",
            "The interface firmware FAILED to download the flash programming algorithms",
            "The interface firmware FAILED to download the flash data contents",
            "The interface firmware FAILED to initialize the target MCU",
            "The interface firmware FAILED to unlock the target",
            "Flash algorithm erase sector command FAILURE",
            "Flash algorithm erase all command FAILURE",
            "Flash algorithm write command FAILURE",
        ],
    },
    PhraseFamily {
        category: FailureCategory::InApplication,
        phrases: &["In application programming", "The bootloader CRC did not pass"],
    },
];

/// Maps flash signals to outcomes
#[derive(Debug, Clone)]
pub struct Classifier {
    // One entry per category, kept in priority order
    families: Vec<(FailureCategory, Vec<String>)>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_families(DAPLINK_PHRASES)
    }
}

impl Classifier {
    /// Build a classifier from a phrase table
    pub fn from_families(table: &[PhraseFamily]) -> Self {
        let mut classifier = Self {
            families: FailureCategory::ALL
                .into_iter()
                .map(|c| (c, Vec::new()))
                .collect(),
        };
        for family in table {
            for phrase in family.phrases {
                classifier.add_phrase(family.category, *phrase);
            }
        }
        classifier
    }

    /// Add a phrase to a category
    ///
    /// Phrases added later are checked after the existing phrases of the same
    /// category; category priority is unaffected.
    pub fn add_phrase(&mut self, category: FailureCategory, phrase: impl Into<String>) {
        let phrase = phrase.into();
        if phrase.is_empty() {
            return;
        }
        if let Some((_, phrases)) = self.families.iter_mut().find(|(c, _)| *c == category) {
            phrases.push(phrase);
        }
    }

    /// Classify a completed attempt
    pub fn classify(&self, signal: &FlashSignal) -> Outcome {
        match signal {
            FlashSignal::ReturnCode(code) => Outcome::from_return_code(*code),
            FlashSignal::Marker {
                mount_point,
                marker_files,
            } => self.classify_marker(mount_point, marker_files),
        }
    }

    /// Classify the content of a failure marker file
    pub fn classify_text(&self, text: &str) -> Outcome {
        if text.trim().is_empty() {
            return Outcome::UnknownFailure;
        }

        self.families
            .iter()
            .find(|(_, phrases)| phrases.iter().any(|p| text.contains(p.as_str())))
            .map_or(Outcome::UnknownFailure, |(category, _)| {
                Outcome::Failure(*category)
            })
    }

    /// Classify by the presence and content of a marker file on a volume
    pub fn classify_marker(&self, mount_point: &Path, marker_files: &[String]) -> Outcome {
        if !mount_point.is_dir() {
            log::error!(
                "Mount point {} is not available, cannot verify flashing",
                mount_point.display()
            );
            return Outcome::UnknownFailure;
        }

        let Some(marker) = find_marker(mount_point, marker_files) else {
            return Outcome::Success;
        };

        match fs::read_to_string(&marker) {
            Ok(text) => {
                let outcome = self.classify_text(&text);
                log::warn!(
                    "{} found: {} -> {}",
                    marker.display(),
                    text.trim(),
                    outcome
                );
                outcome
            }
            Err(e) => {
                log::warn!("{} found but cannot be read: {}", marker.display(), e);
                Outcome::UnknownFailure
            }
        }
    }
}

/// Find a marker file, matching names case-insensitively like FAT volumes do
fn find_marker(mount_point: &Path, marker_files: &[String]) -> Option<PathBuf> {
    for name in marker_files {
        let direct = mount_point.join(name);
        if direct.is_file() {
            return Some(direct);
        }
    }

    let entries = fs::read_dir(mount_point).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                    marker_files.iter().any(|m| m.eq_ignore_ascii_case(n))
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(reason: &str, code: i32) {
        let outcome = Classifier::default().classify_text(reason);
        assert_eq!(outcome.code(), code, "{:?} -> {:?}", reason, outcome);
        assert!(matches!(outcome, Outcome::Failure(_)), "{:?}", reason);
    }

    #[test]
    fn test_stream_phrases() {
        check("An internal error has occurred", 1);
        check("End of stream has been reached", 1);
        check("End of stream is unknown", 1);
    }

    #[test]
    fn test_transfer_phrases() {
        check("An error occurred during the transfer", 2);
        check("Possible mismatch between file size and size programmed", 2);
        check(
            "File sent out of order by PC. Target might not be programmed correctly.",
            2,
        );
        check("An error has occurred", 2);
    }

    #[test]
    fn test_image_phrases() {
        check("The transfer timed out.", 3);
        check(
            "The interface firmware ABORTED programming. Image is trying to set security bits",
            3,
        );
        check(
            "The hex file cannot be decoded. Checksum calculation failure occurred.",
            3,
        );
        check("The hex file cannot be decoded. Parser logic failure occurred.", 3);
        check("The hex file cannot be programmed. Logic failure occurred.", 3);
        check(
            "The hex file you dropped isn't compatible with this mode or device.\
             Are you in MAINTENANCE mode? See HELP FAQ.HTM",
            3,
        );
        check("The hex file offset load address is not correct.", 3);
        check("The starting address for the bootloader update is wrong.", 3);
        check("The starting address for the interface update is wrong.", 3);
        check(
            "The application file format is unknown and cannot be parsed and/or processed.",
            3,
        );
    }

    #[test]
    fn test_interface_phrases() {
        check("The interface firmware FAILED to reset/halt the target MCU", 4);
        check(
            "The interface firmware FAILED to download the flash programming algorithms to the target MCU",
            4,
        );
        check(
            "The interface firmware FAILED to download the flash data contents to be programmed",
            4,
        );
        check("The interface firmware FAILED to initialize the target MCU", 4);
        check("The interface firmware FAILED to unlock the target for programming", 4);
        check("Flash algorithm erase sector command FAILURE", 4);
        check("Flash algorithm erase all command FAILURE", 4);
        check("Flash algorithm write command FAILURE", 4);
    }

    #[test]
    fn test_in_application_phrases() {
        check("In application programming aborted due to an out of bounds address.", 5);
        check("In application programming initialization failed.", 5);
        check("In application programming uninit failed.", 5);
        check("In application programming write failed.", 5);
        check("In application programming sector erase failed.", 5);
        check("In application programming mass erase failed.", 5);
        check("In application programming not supported on this device.", 5);
        check(
            "In application programming failed because the update sent was incomplete.",
            5,
        );
        check("The bootloader CRC did not pass.", 5);
    }

    #[test]
    fn test_daplink_file_layout() {
        // DAPLink prefixes the reason with "error: " and appends a type line
        check("error: The transfer timed out.\r\ntype: transient, user\r\n", 3);
    }

    #[test]
    fn test_unknown_text() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify_text(""), Outcome::UnknownFailure);
        assert_eq!(classifier.classify_text("  \n"), Outcome::UnknownFailure);
        assert_eq!(
            classifier.classify_text("something odd happened"),
            Outcome::UnknownFailure
        );
    }

    #[test]
    fn test_added_phrase() {
        let mut classifier = Classifier::default();
        assert_eq!(
            classifier.classify_text("Target voltage too low"),
            Outcome::UnknownFailure
        );
        classifier.add_phrase(FailureCategory::Interface, "Target voltage too low");
        assert_eq!(
            classifier.classify_text("Target voltage too low"),
            Outcome::Failure(FailureCategory::Interface)
        );
    }

    #[test]
    fn test_return_code_pass_through() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify(&FlashSignal::ReturnCode(0)),
            Outcome::Success
        );
        assert_eq!(
            classifier.classify(&FlashSignal::ReturnCode(2)),
            Outcome::ToolExit(2)
        );
    }

    fn marker_signal(dir: &Path) -> FlashSignal {
        FlashSignal::Marker {
            mount_point: dir.to_path_buf(),
            marker_files: vec!["FAIL.TXT".to_string()],
        }
    }

    #[test]
    fn test_marker_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("DETAILS.TXT"), "Unique ID: 0240").unwrap();
        assert_eq!(
            Classifier::default().classify(&marker_signal(dir.path())),
            Outcome::Success
        );
    }

    #[test]
    fn test_marker_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("FAIL.TXT"), "").unwrap();
        assert_eq!(
            Classifier::default().classify(&marker_signal(dir.path())),
            Outcome::UnknownFailure
        );
    }

    #[test]
    fn test_marker_lowercase_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("fail.txt"),
            "An error occurred during the transfer",
        )
        .unwrap();
        assert_eq!(
            Classifier::default().classify(&marker_signal(dir.path())),
            Outcome::Failure(FailureCategory::Transfer)
        );
    }

    #[test]
    fn test_marker_not_text() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("FAIL.TXT"), [0xFF, 0xFE, 0x00, 0xC3]).unwrap();
        assert_eq!(
            Classifier::default().classify(&marker_signal(dir.path())),
            Outcome::UnknownFailure
        );
    }

    #[test]
    fn test_missing_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("DAPLINK");
        assert_eq!(
            Classifier::default().classify(&marker_signal(&gone)),
            Outcome::UnknownFailure
        );
    }

    #[test]
    fn test_classification_is_repeatable() {
        let classifier = Classifier::default();
        let text = "The interface firmware FAILED to initialize the target MCU";
        assert_eq!(classifier.classify_text(text), classifier.classify_text(text));
    }
}
