//! Audio media types accepted for upload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content types accepted by default.
pub const DEFAULT_ALLOWED_CONTENT_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/aac",
    "audio/ogg",
    "audio/opus",
    "audio/flac",
    "audio/x-flac",
    "audio/wav",
    "audio/x-wav",
    "audio/webm",
];

/// A normalised `type/subtype` media type without parameters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaType(String);

impl MediaType {
    /// Normalise a declared content type.
    ///
    /// Parameters (`; codecs=...`) are dropped and the essence is lowercased.
    pub fn parse(declared: &str) -> crate::Result<Self> {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let Some((ty, subtype)) = essence.split_once('/') else {
            return Err(crate::Error::InvalidMediaType(format!(
                "missing subtype: {declared:?}"
            )));
        };
        if ty.is_empty() || subtype.is_empty() || subtype.contains('/') {
            return Err(crate::Error::InvalidMediaType(format!(
                "malformed media type: {declared:?}"
            )));
        }
        if essence
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(crate::Error::InvalidMediaType(format!(
                "malformed media type: {declared:?}"
            )));
        }

        Ok(Self(essence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the top-level type is `audio`.
    pub fn is_audio(&self) -> bool {
        self.0.starts_with("audio/")
    }

    /// Allow-list membership. Entries are compared after normalisation.
    pub fn is_allowed<S: AsRef<str>>(&self, allowed: &[S]) -> bool {
        allowed.iter().any(|entry| {
            MediaType::parse(entry.as_ref())
                .map(|m| m == *self)
                .unwrap_or(false)
        })
    }

    /// Conventional file extension, used for download filenames.
    pub fn file_extension(&self) -> &'static str {
        match self.0.as_str() {
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/mp4" => "m4a",
            "audio/aac" => "aac",
            "audio/ogg" => "ogg",
            "audio/opus" => "opus",
            "audio/flac" | "audio/x-flac" => "flac",
            "audio/wav" | "audio/x-wav" => "wav",
            "audio/webm" => "webm",
            _ => "bin",
        }
    }

    /// Best guess from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ty = match ext.to_ascii_lowercase().as_str() {
            "mp3" => "audio/mpeg",
            "m4a" | "mp4" => "audio/mp4",
            "aac" => "audio/aac",
            "ogg" | "oga" => "audio/ogg",
            "opus" => "audio/opus",
            "flac" => "audio/flac",
            "wav" => "audio/wav",
            "webm" => "audio/webm",
            _ => return None,
        };
        Some(Self(ty.to_string()))
    }
}

impl fmt::Debug for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MediaType({})", self.0)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
