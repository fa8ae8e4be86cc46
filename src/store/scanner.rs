//! Recording store scanner
//!
//! Lists a room directory and classifies its entries by filename. A
//! malformed name is logged and skipped; only a missing or unreadable room
//! directory fails the scan.

use super::naming;
use super::types::{
    ConvertedFile, DeletableFile, DiscoveryError, FinalArtifact, Fragment, MixedFile, ParseError,
    Record, ScanCategory,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Read-only view over the per-room directories under the base directory
#[derive(Debug, Clone)]
pub struct RecordingStore {
    base_dir: PathBuf,
}

impl RecordingStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn room_dir(&self, room_id: &str) -> PathBuf {
        self.base_dir.join(room_id)
    }

    pub fn path_of(&self, room_id: &str, filename: &str) -> PathBuf {
        self.room_dir(room_id).join(filename)
    }

    /// Scan one category and wrap the results as generic records
    pub async fn scan(
        &self,
        room_id: &str,
        category: ScanCategory,
    ) -> Result<Vec<Record>, DiscoveryError> {
        let records = match category {
            ScanCategory::Fragments => self
                .fragments(room_id)
                .await?
                .into_iter()
                .map(Record::Fragment)
                .collect(),
            ScanCategory::Mixed => self
                .mixed(room_id)
                .await?
                .into_iter()
                .map(Record::Mixed)
                .collect(),
            ScanCategory::Converted => self
                .converted(room_id)
                .await?
                .into_iter()
                .map(Record::Converted)
                .collect(),
            ScanCategory::Final => self
                .final_artifact(room_id)
                .await?
                .into_iter()
                .map(Record::Final)
                .collect(),
            ScanCategory::Deletable => self
                .deletable(room_id)
                .await?
                .into_iter()
                .map(Record::Deletable)
                .collect(),
        };
        Ok(records)
    }

    /// Raw recorder fragments, in discovery order
    pub async fn fragments(&self, room_id: &str) -> Result<Vec<Fragment>, DiscoveryError> {
        let names = self.list_names(room_id).await?;
        Ok(parse_matching(room_id, &names, naming::is_fragment_name, naming::parse_fragment))
    }

    pub async fn mixed(&self, room_id: &str) -> Result<Vec<MixedFile>, DiscoveryError> {
        tracing::debug!("Scanning mixed files for room {}", room_id);
        let names = self.list_names(room_id).await?;
        Ok(parse_matching(room_id, &names, naming::is_mixed_name, naming::parse_mixed))
    }

    pub async fn converted(&self, room_id: &str) -> Result<Vec<ConvertedFile>, DiscoveryError> {
        tracing::debug!("Scanning converted files for room {}", room_id);
        let names = self.list_names(room_id).await?;
        Ok(parse_matching(
            room_id,
            &names,
            naming::is_converted_name,
            naming::parse_converted,
        ))
    }

    /// The merged `{room}.mkv`, if a previous run already produced it
    pub async fn final_artifact(
        &self,
        room_id: &str,
    ) -> Result<Option<FinalArtifact>, DiscoveryError> {
        let expected = naming::final_name(room_id);
        let names = self.list_names(room_id).await?;

        Ok(names
            .into_iter()
            .find(|name| *name == expected)
            .map(|filename| FinalArtifact {
                room_id: room_id.to_string(),
                path: self.path_of(room_id, &filename),
                filename,
            }))
    }

    pub async fn deletable(&self, room_id: &str) -> Result<Vec<DeletableFile>, DiscoveryError> {
        tracing::debug!("Scanning deletable files for room {}", room_id);
        let names = self.list_names(room_id).await?;

        Ok(names
            .into_iter()
            .filter(|name| naming::is_deletable_name(name))
            .map(|filename| DeletableFile {
                room_id: room_id.to_string(),
                path: self.path_of(room_id, &filename),
                filename,
            })
            .collect())
    }

    /// Regular file names in the room directory, sorted by name
    async fn list_names(&self, room_id: &str) -> Result<Vec<String>, DiscoveryError> {
        if !naming::is_valid_room_id(room_id) {
            return Err(DiscoveryError::InvalidRoomId(room_id.to_string()));
        }

        let path = self.room_dir(room_id);
        let unreadable = |source: std::io::Error| DiscoveryError::Unreadable {
            path: path.clone(),
            source,
        };

        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DiscoveryError::RoomNotFound(path.clone()))
            }
            Err(e) => return Err(unreadable(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(unreadable)? {
            let file_type = entry.file_type().await.map_err(unreadable)?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => tracing::warn!("Skipping non UTF-8 entry {:?} in {:?}", raw, path),
            }
        }

        names.sort();
        Ok(names)
    }
}

fn parse_matching<T>(
    room_id: &str,
    names: &[String],
    matches: fn(&str) -> bool,
    parse: fn(&str, &str) -> Result<T, ParseError>,
) -> Vec<T> {
    names
        .iter()
        .filter(|name| matches(name))
        .filter_map(|name| match parse(room_id, name) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping malformed entry in room {}: {}", room_id, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn room_with(files: &[&str]) -> (tempfile::TempDir, RecordingStore) {
        let dir = tempdir().unwrap();
        let room = dir.path().join("abc");
        fs::create_dir_all(&room).unwrap();
        for file in files {
            fs::write(room.join(file), b"data").unwrap();
        }
        let store = RecordingStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_room_is_discovery_error() {
        let dir = tempdir().unwrap();
        let store = RecordingStore::new(dir.path());
        let result = store.fragments("nope").await;
        assert!(matches!(result, Err(DiscoveryError::RoomNotFound(_))));

        let result = store.fragments("../etc").await;
        assert!(matches!(result, Err(DiscoveryError::InvalidRoomId(_))));
    }

    #[tokio::test]
    async fn test_malformed_fragment_is_skipped() {
        let (_dir, store) = room_with(&[
            "videoroom-x-abc-1-1000-video",
            "videoroom-x-abc-oops-1000-audio",
            "videoroom-x-abc-1",
            "videoroom-x-abc-1-1000-audio",
            "videoroom-x-abc-1-1000-audio.mjr",
            "notes.txt",
        ]);

        let fragments = store.fragments("abc").await.unwrap();
        let names: Vec<_> = fragments.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["videoroom-x-abc-1-1000-audio", "videoroom-x-abc-1-1000-video"]
        );
    }

    #[tokio::test]
    async fn test_categories() {
        let (_dir, store) = room_with(&[
            "videoroom-x-abc-1-1000-audio.opus",
            "videoroom-x-abc-1-1000-video.webm",
            "mixed-videoroom-x-abc-1-1000-video.webm",
            "converted-mixed-videoroom-x-abc-1-1000-video.webm.mkv",
        ]);

        assert_eq!(store.fragments("abc").await.unwrap().len(), 2);
        assert_eq!(store.mixed("abc").await.unwrap().len(), 1);

        let converted = store.converted("abc").await.unwrap();
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].user_id, 1);

        assert!(store.final_artifact("abc").await.unwrap().is_none());
        assert_eq!(store.deletable("abc").await.unwrap().len(), 4);

        let records = store.scan("abc", ScanCategory::Mixed).await.unwrap();
        assert!(matches!(records.as_slice(), [Record::Mixed(_)]));
    }

    #[tokio::test]
    async fn test_final_artifact_is_exact_name() {
        let (_dir, store) = room_with(&["abc.mkv.part", "abcd.mkv"]);
        assert!(store.final_artifact("abc").await.unwrap().is_none());

        let (_dir, store) = room_with(&["abc.mkv"]);
        let artifact = store.final_artifact("abc").await.unwrap().unwrap();
        assert_eq!(artifact.filename, "abc.mkv");
        assert!(artifact.path.ends_with("abc/abc.mkv"));
    }
}
