//! Flash attempt outcomes
//!
//! Every flash attempt ends in exactly one [`Outcome`]. Outcomes map onto a
//! fixed set of integer codes so they can be summed across a batch and
//! returned as a process exit status.

use std::fmt;

/// Code for a successful attempt
pub const EXIT_CODE_SUCCESS: i32 = 0;
/// Code for a failure that could not be categorized
pub const EXIT_CODE_UNKNOWN_FAILURE: i32 = 1;
/// Several platforms are attached and none was chosen
pub const EXIT_CODE_NO_PLATFORM_GIVEN: i32 = 35;
/// The device filter matched no attached device
pub const EXIT_CODE_COULD_NOT_MAP_TARGET_ID_TO_DEVICE: i32 = 40;
/// The build file is missing, unreadable or empty
pub const EXIT_CODE_FILE_DOES_NOT_EXIST: i32 = 45;
/// The attempt was interrupted by the user
pub const EXIT_CODE_KEYBOARD_INTERRUPT: i32 = 50;
/// An explicit target id or platform was not found in the inventory
pub const EXIT_CODE_TARGET_ID_COULD_NOT_BE_MAPPED_TO_DEVICE: i32 = 55;
/// The attempt was interrupted by the system (signal or timeout)
pub const EXIT_CODE_SYSTEM_INTERRUPT: i32 = 60;
/// The requested backend does not exist
pub const EXIT_CODE_REQUESTED_FLASHER_DOES_NOT_EXIST: i32 = 65;

/// Failure buckets reported by mass-storage interface firmware
///
/// The discriminant is the outcome code of the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FailureCategory {
    /// Internal error or unexpected end of stream
    Stream = 1,
    /// Transfer error or size mismatch
    Transfer = 2,
    /// Timeout, aborted programming or undecodable image
    Image = 3,
    /// Interface firmware failed to reset, initialize, unlock or program the target
    Interface = 4,
    /// In-application programming failure
    InApplication = 5,
}

impl FailureCategory {
    /// All categories, in classification priority order
    pub const ALL: [FailureCategory; 5] = [
        FailureCategory::Stream,
        FailureCategory::Transfer,
        FailureCategory::Image,
        FailureCategory::Interface,
        FailureCategory::InApplication,
    ];

    /// Outcome code of this category
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Look up a category by its code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u8 == code)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stream => "internal/stream error",
            Self::Transfer => "transfer error",
            Self::Image => "image rejected",
            Self::Interface => "interface firmware failure",
            Self::InApplication => "in-application programming failure",
        };
        f.write_str(name)
    }
}

/// Who interrupted an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptKind {
    /// Ctrl-C or an explicit cancel request
    User,
    /// Termination by the system, or the attempt timeout expired
    System,
}

/// Result of one flash attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The image was flashed
    Success,
    /// The backend reported a categorized failure
    Failure(FailureCategory),
    /// The backend reported a failure without a recognizable reason
    UnknownFailure,
    /// The vendor tool exited with this non-zero code
    ToolExit(i32),
    /// Several platforms are attached and none was chosen
    NoPlatformGiven,
    /// The device filter matched no attached device
    CouldNotMapTargetToDevice,
    /// The build file is missing, unreadable or empty
    BuildNotFound,
    /// The explicit target id or platform is not in the inventory
    TargetNotMapped,
    /// The requested backend does not exist
    UnknownBackend,
    /// Interrupted by the user
    InterruptedByUser,
    /// Interrupted by the system
    InterruptedBySystem,
}

impl Outcome {
    /// Outcome for a vendor tool return code (0 is success)
    pub fn from_return_code(code: i32) -> Self {
        match code {
            EXIT_CODE_SUCCESS => Self::Success,
            code => Self::ToolExit(code),
        }
    }

    /// Outcome for an interruption
    pub fn interrupted(kind: InterruptKind) -> Self {
        match kind {
            InterruptKind::User => Self::InterruptedByUser,
            InterruptKind::System => Self::InterruptedBySystem,
        }
    }

    /// Integer code of this outcome
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => EXIT_CODE_SUCCESS,
            Self::Failure(category) => category.code(),
            Self::UnknownFailure => EXIT_CODE_UNKNOWN_FAILURE,
            Self::ToolExit(code) => code,
            Self::NoPlatformGiven => EXIT_CODE_NO_PLATFORM_GIVEN,
            Self::CouldNotMapTargetToDevice => EXIT_CODE_COULD_NOT_MAP_TARGET_ID_TO_DEVICE,
            Self::BuildNotFound => EXIT_CODE_FILE_DOES_NOT_EXIST,
            Self::TargetNotMapped => EXIT_CODE_TARGET_ID_COULD_NOT_BE_MAPPED_TO_DEVICE,
            Self::UnknownBackend => EXIT_CODE_REQUESTED_FLASHER_DOES_NOT_EXIST,
            Self::InterruptedByUser => EXIT_CODE_KEYBOARD_INTERRUPT,
            Self::InterruptedBySystem => EXIT_CODE_SYSTEM_INTERRUPT,
        }
    }

    /// Whether the attempt succeeded
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(category) => write!(f, "{} ({})", category, category.code()),
            Self::UnknownFailure => write!(f, "unknown failure"),
            Self::ToolExit(code) => write!(f, "tool exited with code {}", code),
            Self::NoPlatformGiven => write!(f, "multiple platforms attached, none given"),
            Self::CouldNotMapTargetToDevice => write!(f, "no devices matched"),
            Self::BuildNotFound => write!(f, "build file does not exist"),
            Self::TargetNotMapped => write!(f, "target could not be mapped to a device"),
            Self::UnknownBackend => write!(f, "requested flasher does not exist"),
            Self::InterruptedByUser => write!(f, "aborted by user"),
            Self::InterruptedBySystem => write!(f, "aborted by system"),
        }
    }
}
