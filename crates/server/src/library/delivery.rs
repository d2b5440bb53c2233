//! Range-aware resolution of song bytes.

use super::{Library, stored_length};
use super::error::{LibraryError, LibraryResult};
use cadence_core::range::RangeError;
use cadence_core::{ByteRange, MediaType, RangeSpec, SongId};
use cadence_metadata::repos::SongRepo;
use cadence_storage::ByteStream;
use serde::Serialize;
use tracing::instrument;

/// Whether the payload is the whole resource or a sub-range of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    FullContent,
    PartialContent,
}

/// Advisory presentation hint. Streaming and download share the data path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    #[default]
    Inline,
    Attachment,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }
}

/// The outcome of resolving a delivery request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub status: ResolutionStatus,
    pub range: ByteRange,
    pub total_length: u64,
    pub content_type: String,
    pub blob_key: String,
    pub disposition: Disposition,
    /// Suggested download name, `"<artist> - <title>.<ext>"`.
    pub filename: String,
}

impl Resolution {
    /// Value for a `Content-Disposition` header.
    pub fn content_disposition(&self) -> String {
        match self.disposition {
            Disposition::Inline => "inline".to_string(),
            Disposition::Attachment => {
                format!("attachment; filename=\"{}\"", self.filename)
            }
        }
    }
}

impl Library {
    /// Resolve which bytes of a song a request should receive.
    ///
    /// Never writes metadata.
    #[instrument(skip(self), fields(song_id = %song_id))]
    pub async fn resolve(
        &self,
        song_id: SongId,
        range: Option<RangeSpec>,
        disposition: Disposition,
    ) -> LibraryResult<Resolution> {
        let row = self
            .metadata
            .get_song(song_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound(format!("song {song_id}")))?;

        let total = stored_length(&row)?;
        let (status, range) = match range {
            None => (ResolutionStatus::FullContent, ByteRange::full(total)),
            Some(spec) => match spec.resolve(total) {
                Ok(range) if range.start == 0 && range.end == total => {
                    (ResolutionStatus::FullContent, range)
                }
                Ok(range) => (ResolutionStatus::PartialContent, range),
                Err(RangeError::NotSatisfiable { total }) => {
                    return Err(LibraryError::RangeNotSatisfiable { total });
                }
                Err(RangeError::Invalid(msg)) => return Err(LibraryError::InvalidInput(msg)),
            },
        };

        let extension = MediaType::parse(&row.content_type)
            .map(|m| m.file_extension())
            .unwrap_or("bin");

        Ok(Resolution {
            status,
            range,
            total_length: total,
            content_type: row.content_type,
            blob_key: row.blob_key,
            disposition,
            filename: download_filename(&row.artist, &row.title, extension),
        })
    }

    /// Open the resolved bytes as a stream.
    ///
    /// A zero-length resource yields an empty stream without touching the
    /// blob store.
    pub async fn open_stream(&self, resolution: &Resolution) -> LibraryResult<ByteStream> {
        if resolution.range.is_empty() {
            return Ok(Box::pin(futures::stream::empty()));
        }

        let stream = self
            .storage
            .get_range_stream(
                &resolution.blob_key,
                resolution.range.start,
                resolution.range.end,
            )
            .await
            .map_err(|e| match e {
                cadence_storage::StorageError::NotFound(key) => {
                    LibraryError::NotFound(format!("blob {key}"))
                }
                other => LibraryError::Storage(other),
            })?;
        Ok(stream)
    }
}

/// Build a header-safe filename. Quotes, path separators and control
/// characters are replaced.
fn download_filename(artist: &str, title: &str, extension: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| match c {
                '"' | '\\' | '/' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect::<String>()
            .trim()
            .to_string()
    };
    format!("{} - {}.{}", sanitize(artist), sanitize(title), extension)
}
