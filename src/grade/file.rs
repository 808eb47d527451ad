/// Day-file surface
///
/// One grade file per weekday, named by the Portuguese weekday code with the
/// accent preserved (SEG..DOM, Saturday is SÁB), 48 lines sorted by time.
/// Reads and writes go through the `FileSurface` seam so tests and alternate
/// hosts can substitute the filesystem.
use std::path::{Path, PathBuf};

// ── Weekday naming ────────────────────────────────────────────────────────────

/// Uppercase weekday codes, Monday-first to match `active_days` indexing.
pub const WEEKDAY_STEMS: [&str; 7] = ["SEG", "TER", "QUA", "QUI", "SEX", "SÁB", "DOM"];

/// Grade file name for a weekday index (0 = Monday .. 6 = Sunday).
pub fn day_file_name(weekday_idx: u8) -> String {
    let stem = WEEKDAY_STEMS[(weekday_idx as usize).min(6)];
    format!("{stem}.txt")
}

// ── File surface ──────────────────────────────────────────────────────────────

pub trait FileSurface: Send + Sync {
    fn read_text_file(&self, folder: &str, name: &str) -> Result<String, String>;
    fn write_text_file(&self, folder: &str, name: &str, content: &str) -> Result<(), String>;
    /// List file names (not paths) in `folder` matching the extension,
    /// case-insensitive. Unknown folders are an error the caller maps to an
    /// empty listing.
    fn list_files(&self, folder: &str, ext: &str) -> Result<Vec<String>, String>;
}

pub struct LocalFileSurface;

impl FileSurface for LocalFileSurface {
    fn read_text_file(&self, folder: &str, name: &str) -> Result<String, String> {
        let path: PathBuf = Path::new(folder).join(name);
        std::fs::read_to_string(&path).map_err(|e| format!("read {}: {e}", path.display()))
    }

    fn write_text_file(&self, folder: &str, name: &str, content: &str) -> Result<(), String> {
        std::fs::create_dir_all(folder).map_err(|e| format!("create dir {folder}: {e}"))?;
        let path: PathBuf = Path::new(folder).join(name);
        std::fs::write(&path, content).map_err(|e| format!("write {}: {e}", path.display()))
    }

    fn list_files(&self, folder: &str, ext: &str) -> Result<Vec<String>, String> {
        let entries =
            std::fs::read_dir(folder).map_err(|e| format!("list {folder}: {e}"))?;
        let ext_lc = ext.trim_start_matches('.').to_lowercase();
        let mut names = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let matches = name
                .rsplit_once('.')
                .map(|(_, e)| e.to_lowercase() == ext_lc)
                .unwrap_or(false);
            if matches {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturday_keeps_the_accent() {
        assert_eq!(day_file_name(5), "SÁB.txt");
        assert_eq!(day_file_name(0), "SEG.txt");
        assert_eq!(day_file_name(6), "DOM.txt");
    }

    #[test]
    fn local_surface_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_string_lossy().to_string();
        let surface = LocalFileSurface;

        surface
            .write_text_file(&folder, "SEG.txt", "08:00 (ID=X) \"A.MP3\"\n")
            .unwrap();
        let content = surface.read_text_file(&folder, "SEG.txt").unwrap();
        assert!(content.starts_with("08:00"));

        std::fs::write(dir.path().join("Artist - Song.MP3"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt.bak"), b"").unwrap();
        let files = surface.list_files(&folder, "mp3").unwrap();
        assert_eq!(files, vec!["Artist - Song.MP3".to_string()]);
    }

    #[test]
    fn unknown_folder_is_an_error_not_a_panic() {
        let surface = LocalFileSurface;
        assert!(surface.list_files("/nonexistent/folder/xyz", "mp3").is_err());
        assert!(surface
            .read_text_file("/nonexistent/folder/xyz", "SEG.txt")
            .is_err());
    }
}
