//! Error codes returned by the audio processor and its stages.

use std::fmt;

/// Errors returned by audio processing operations.
///
/// Success is `Ok(())`; [`Error::code`] gives the numeric code used on the
/// wire and in logs, where `0` means no error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    Unspecified,
    CreationFailed,
    UnsupportedComponent,
    UnsupportedFunction,
    /// A required buffer was missing.
    NullPointer,
    /// A setting was outside its valid range.
    BadParameter,
    BadSampleRate,
    /// Buffer sizes disagree with the declared stream format.
    BadDataLength,
    BadNumberChannels,
    File,
    /// A per-frame parameter (stream delay, analog level, drift) was not
    /// provided for this frame.
    StreamParameterNotSet,
    /// The queried stage or feature is disabled.
    NotEnabled,
    /// A stream parameter was out of range and has been clamped. Processing
    /// continued.
    BadStreamParameterWarning,
}

impl Error {
    pub fn code(self) -> i32 {
        match self {
            Self::Unspecified => -1,
            Self::CreationFailed => -2,
            Self::UnsupportedComponent => -3,
            Self::UnsupportedFunction => -4,
            Self::NullPointer => -5,
            Self::BadParameter => -6,
            Self::BadSampleRate => -7,
            Self::BadDataLength => -8,
            Self::BadNumberChannels => -9,
            Self::File => -10,
            Self::StreamParameterNotSet => -11,
            Self::NotEnabled => -12,
            Self::BadStreamParameterWarning => -13,
        }
    }

    /// Maps a numeric code back to an error. `0` and unknown codes give
    /// `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::Unspecified,
            -2 => Self::CreationFailed,
            -3 => Self::UnsupportedComponent,
            -4 => Self::UnsupportedFunction,
            -5 => Self::NullPointer,
            -6 => Self::BadParameter,
            -7 => Self::BadSampleRate,
            -8 => Self::BadDataLength,
            -9 => Self::BadNumberChannels,
            -10 => Self::File,
            -11 => Self::StreamParameterNotSet,
            -12 => Self::NotEnabled,
            -13 => Self::BadStreamParameterWarning,
            _ => return None,
        })
    }

    /// Warnings report a corrected input; the call still did its work.
    pub fn is_warning(self) -> bool {
        matches!(self, Self::BadStreamParameterWarning)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Unspecified => "unspecified error",
            Self::CreationFailed => "creation failed",
            Self::UnsupportedComponent => "unsupported component",
            Self::UnsupportedFunction => "unsupported function",
            Self::NullPointer => "missing buffer",
            Self::BadParameter => "bad parameter",
            Self::BadSampleRate => "bad sample rate",
            Self::BadDataLength => "bad data length",
            Self::BadNumberChannels => "bad number of channels",
            Self::File => "file error",
            Self::StreamParameterNotSet => "stream parameter not set",
            Self::NotEnabled => "not enabled",
            Self::BadStreamParameterWarning => "bad stream parameter (clamped)",
        };
        write!(f, "{msg} ({})", self.code())
    }
}

impl std::error::Error for Error {}
