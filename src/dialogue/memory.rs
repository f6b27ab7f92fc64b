//! Long-term memory kept as plain Markdown notes in one directory.

use crate::config::DialogueConfig;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

const NOTE_EXTENSIONS: &[&str] = &["md", "txt"];

/// A directory of notes, one file per saved summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStore {
    dir: PathBuf,
}

impl MemoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.local/share/parley/knowledge` on Linux.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("parley").join("knowledge"))
    }

    /// The configured store, or `None` when memory is disabled or no data
    /// directory can be found.
    pub fn from_config(config: &DialogueConfig) -> Option<Self> {
        if !config.memory {
            return None;
        }
        config
            .memory_dir
            .clone()
            .or_else(Self::default_dir)
            .map(Self::new)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `note` to a new file named after the local time.
    pub fn save(&self, note: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S%.3f").to_string();
        let mut path = self.dir.join(format!("{stamp}.md"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stamp}-{n}.md"));
            n += 1;
        }
        fs::write(&path, note)?;
        tracing::debug!(path = %path.display(), chars = note.len(), "note saved");
        Ok(path)
    }

    /// Every note containing `query`, ignoring case, oldest first.
    ///
    /// A store that was never written to has no notes.
    pub fn search(&self, query: &str) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| NOTE_EXTENSIONS.contains(&ext))
            })
            .collect();
        paths.sort();

        let needle = query.trim().to_lowercase();
        let mut notes = Vec::new();
        for path in paths {
            let content = fs::read_to_string(&path)?;
            if content.to_lowercase().contains(&needle) {
                notes.push(content);
            }
        }
        tracing::debug!(query, found = notes.len(), "memory searched");
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_search_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path().join("knowledge"));

        let first = store.save("# Trip\nThe user is flying to Osaka.").unwrap();
        let second = store.save("# Food\nLikes ramen.").unwrap();
        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "md");

        assert_eq!(store.search("osaka").unwrap(), vec!["# Trip\nThe user is flying to Osaka."]);
        assert_eq!(store.search("").unwrap().len(), 2);
        assert!(store.search("berlin").unwrap().is_empty());
    }

    #[test]
    fn test_search_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path().join("never-created"));
        assert!(store.search("anything").unwrap().is_empty());
    }

    #[test]
    fn test_search_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.txt"), "plain text note about tea").unwrap();
        fs::write(dir.path().join("image.png"), "tea").unwrap();
        let store = MemoryStore::new(dir.path());
        assert_eq!(store.search("TEA").unwrap(), vec!["plain text note about tea"]);
    }

    #[test]
    fn test_from_config_respects_switch_and_dir() {
        let mut config = DialogueConfig {
            memory_dir: Some(PathBuf::from("/tmp/parley-notes")),
            ..DialogueConfig::default()
        };
        assert_eq!(
            MemoryStore::from_config(&config).unwrap().dir(),
            Path::new("/tmp/parley-notes")
        );
        config.memory = false;
        assert!(MemoryStore::from_config(&config).is_none());
    }
}
