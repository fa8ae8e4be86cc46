//! Recording store records
//!
//! Every record is derived from a filename in a room directory. The
//! filesystem is the only source of truth.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Kind of stream a fragment carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Other(String),
}

impl MediaType {
    /// Classify the last filename field, e.g. `video`, `audio.opus`, `video.webm`
    pub fn from_token(token: &str) -> Self {
        let (stem, ext) = match token.split_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (token, None),
        };

        match (stem, ext) {
            ("video", _) | (_, Some("webm")) => MediaType::Video,
            ("audio", _) | (_, Some("opus")) => MediaType::Audio,
            _ => MediaType::Other(token.to_string()),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaType::Video)
    }
}

/// One raw audio or video stream written by the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub room_id: String,
    pub user_id: u64,
    pub timestamp_ms: u64,
    pub filename: String,
    pub media_type: MediaType,
}

/// Two fragments of one user recorded at the same instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePair {
    pub user_id: u64,
    pub file_a: Fragment,
    pub file_b: Fragment,
}

impl FilePair {
    /// The video half of the pair
    ///
    /// When the media types do not tell the halves apart, the later
    /// fragment in sort order is treated as video.
    pub fn video(&self) -> &Fragment {
        match (self.file_a.media_type.is_video(), self.file_b.media_type.is_video()) {
            (true, false) => &self.file_a,
            _ => &self.file_b,
        }
    }

    /// The audio half of the pair
    pub fn audio(&self) -> &Fragment {
        if std::ptr::eq(self.video(), &self.file_a) {
            &self.file_b
        } else {
            &self.file_a
        }
    }
}

/// Intermediate per-user file: a pair muxed without re-encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixedFile {
    pub room_id: String,
    pub user_id: u64,
    pub timestamp_ms: u64,
    pub filename: String,
}

/// Intermediate per-user file: a mixed file rescaled and re-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedFile {
    pub room_id: String,
    pub user_id: u64,
    pub timestamp_ms: u64,
    pub filename: String,
}

/// The merged output of a room; its presence marks the room as done
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalArtifact {
    pub room_id: String,
    pub filename: String,
    pub path: PathBuf,
}

/// Intermediate file eligible for removal after a successful merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletableFile {
    pub room_id: String,
    pub filename: String,
    pub path: PathBuf,
}

/// Scanner categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanCategory {
    Fragments,
    Mixed,
    Converted,
    Final,
    Deletable,
}

/// A classified directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Record {
    Fragment(Fragment),
    Mixed(MixedFile),
    Converted(ConvertedFile),
    Final(FinalArtifact),
    Deletable(DeletableFile),
}

/// Why a filename could not be turned into a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{filename}: expected at least {expected} '-' separated fields, found {found}")]
    MissingFields {
        filename: String,
        expected: usize,
        found: usize,
    },

    #[error("{filename}: field {field} ({name}) is not a number: {value:?}")]
    NotNumeric {
        filename: String,
        field: usize,
        name: &'static str,
        value: String,
    },
}

/// The room directory itself could not be listed
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid room id: {0:?}")]
    InvalidRoomId(String),

    #[error("Room directory not found: {0:?}")]
    RoomNotFound(PathBuf),

    #[error("Cannot read room directory {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
