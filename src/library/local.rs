/// Folder-scanning library resolver
///
/// Indexes the configured music folders by lowercased "artist - title" stem
/// and answers existence checks from the index. Unknown folders are skipped
/// with a log line; they are a configuration state, not a failure.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::resolver::{LibraryHit, LibraryResolver};
use crate::grade::file::FileSurface;

pub struct FolderLibrary {
    surface: Arc<dyn FileSurface>,
    folders: Vec<String>,
    index: RwLock<HashMap<String, String>>,
}

impl FolderLibrary {
    pub fn new(surface: Arc<dyn FileSurface>, folders: Vec<String>) -> Self {
        let lib = Self {
            surface,
            folders,
            index: RwLock::new(HashMap::new()),
        };
        lib.refresh();
        lib
    }

    /// Rebuild the stem index from the folders on disk.
    pub fn refresh(&self) {
        let mut index = HashMap::new();
        for folder in &self.folders {
            let files = match self.surface.list_files(folder, "mp3") {
                Ok(files) => files,
                Err(e) => {
                    log::debug!("music folder '{folder}' not listable: {e}");
                    continue;
                }
            };
            for name in files {
                let stem = name
                    .rsplit_once('.')
                    .map(|(stem, _)| stem)
                    .unwrap_or(&name)
                    .trim()
                    .to_lowercase();
                index.entry(stem).or_insert(name);
            }
        }
        match self.index.write() {
            Ok(mut guard) => *guard = index,
            Err(e) => log::warn!("folder index poisoned: {e}"),
        }
    }

    pub fn indexed_count(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LibraryResolver for FolderLibrary {
    async fn check_one(&self, artist: &str, title: &str) -> Result<LibraryHit, String> {
        let stem = format!("{} - {}", artist.trim(), title.trim()).to_lowercase();
        let index = self
            .index
            .read()
            .map_err(|e| format!("folder index poisoned: {e}"))?;
        Ok(match index.get(&stem) {
            Some(filename) => LibraryHit {
                exists: true,
                filename: Some(filename.clone()),
            },
            None => LibraryHit::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade::file::LocalFileSurface;

    #[tokio::test]
    async fn finds_files_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Artist X - Song A.MP3"), b"").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"").unwrap();

        let lib = FolderLibrary::new(
            Arc::new(LocalFileSurface),
            vec![dir.path().to_string_lossy().to_string()],
        );
        assert_eq!(lib.indexed_count(), 1);

        let hit = lib.check_one("artist x", "song a").await.unwrap();
        assert!(hit.exists);
        assert_eq!(hit.filename.as_deref(), Some("Artist X - Song A.MP3"));

        let miss = lib.check_one("Artist X", "Song B").await.unwrap();
        assert!(!miss.exists);
    }

    #[tokio::test]
    async fn unknown_folder_means_not_found_not_error() {
        let lib = FolderLibrary::new(
            Arc::new(LocalFileSurface),
            vec!["/nonexistent/music".to_string()],
        );
        let hit = lib.check_one("A", "B").await.unwrap();
        assert!(!hit.exists);
    }
}
