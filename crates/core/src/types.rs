use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(Subject, "The entity whose usage is metered (typically a user account).");
newtype_string!(Platform, "A social network the operation targets (e.g. `facebook`).");
newtype_string!(Operation, "The kind of metered operation (e.g. `post`, `api_call`).");
newtype_string!(Tier, "A subscription tier identifier supplied by billing.");

impl Operation {
    /// Publishing a post to a platform.
    pub const POST: &'static str = "post";
    /// A raw platform API call.
    pub const API_CALL: &'static str = "api_call";
    /// Generating a video asset.
    pub const VIDEO_GENERATE: &'static str = "video_generate";
}

/// Maximum accepted subject length in bytes.
pub const MAX_SUBJECT_LEN: usize = 256;

/// Reasons a subject identifier is rejected before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    #[error("subject must not be empty")]
    Empty,

    #[error("subject exceeds {MAX_SUBJECT_LEN} bytes")]
    TooLong,

    #[error("subject contains control characters")]
    ControlCharacters,
}

/// Reject subjects that cannot be a stable identifier.
///
/// Identity itself is the authentication layer's job; this only catches
/// caller programming errors such as passing an empty string.
pub fn validate_subject(subject: &Subject) -> Result<(), SubjectError> {
    let raw = subject.as_str();
    if raw.trim().is_empty() {
        return Err(SubjectError::Empty);
    }
    if raw.len() > MAX_SUBJECT_LEN {
        return Err(SubjectError::TooLong);
    }
    if raw.chars().any(char::is_control) {
        return Err(SubjectError::ControlCharacters);
    }
    Ok(())
}
