/// Maximum length of a sample identifier, in bytes.
pub const MAX_SAMPLE_ID_LEN: usize = 128;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is longer than the permitted maximum
    #[error("Text exceeds maximum length of {0} characters")]
    TooLong(usize),

    /// The input cannot be used as a single directory name
    #[error("'{0}' is not a valid sample identifier (no '/', '\\' or control characters, and not '.' or '..')")]
    UnsafePathComponent(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A sample identifier that is safe to use as one directory name.
///
/// Every sample gets its own output directory named after its identifier, so the
/// identifier must name exactly one directory:
/// - non-empty after trimming, at most [`MAX_SAMPLE_ID_LEN`] bytes
/// - no path separator (`/` or `\`) and no control characters
/// - not `.` or `..`
///
/// Spaces and non-ASCII letters are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(NonEmptyText);

impl SampleId {
    /// Parses and validates a sample identifier.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let text = NonEmptyText::new(input)?;
        let id = text.as_str();

        if id.len() > MAX_SAMPLE_ID_LEN {
            return Err(TextError::TooLong(MAX_SAMPLE_ID_LEN));
        }

        let ok = !id.chars().any(|c| c == '/' || c == '\\' || c.is_control());

        if !ok || id == "." || id == ".." {
            return Err(TextError::UnsafePathComponent(id.to_owned()));
        }

        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for SampleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SampleId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl serde::Serialize for SampleId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for SampleId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SampleId::parse(&s).map_err(serde::de::Error::custom)
    }
}
