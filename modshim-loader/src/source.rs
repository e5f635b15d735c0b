//! Plugin candidates and their binary handles.

use modshim_runtime::{ModFolder, PluginManifest};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Read access to a plugin's compiled binary.
///
/// `read` is the only blocking call the pipeline makes per plugin and always
/// runs on a blocking worker thread.
pub trait BinaryHandle: Send + Sync {
    fn read(&self) -> io::Result<Vec<u8>>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// A binary file on disk.
#[derive(Debug, Clone)]
pub struct FileBinary {
    path: PathBuf,
}

impl FileBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BinaryHandle for FileBinary {
    fn read(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A binary already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryBinary {
    bytes: Arc<[u8]>,
}

impl MemoryBinary {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl BinaryHandle for MemoryBinary {
    fn read(&self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }

    fn describe(&self) -> String {
        format!("<memory, {} bytes>", self.bytes.len())
    }
}

/// A plugin ready for the pipeline: its manifest plus a way to read its binary.
#[derive(Clone)]
pub struct Candidate {
    pub manifest: PluginManifest,
    pub binary: Arc<dyn BinaryHandle>,
    /// Folder the plugin came from, if any.
    pub path: Option<PathBuf>,
}

impl Candidate {
    pub fn new(manifest: PluginManifest, binary: Arc<dyn BinaryHandle>) -> Self {
        Self {
            manifest,
            binary,
            path: None,
        }
    }

    /// Candidate for a discovered mod folder, reading its entry point file.
    pub fn from_folder(folder: ModFolder) -> Self {
        let binary = Arc::new(FileBinary::new(folder.entry_point_path()));
        Self {
            manifest: folder.manifest,
            binary,
            path: Some(folder.path),
        }
    }

    /// Candidate whose binary bytes are already in memory.
    pub fn in_memory(manifest: PluginManifest, bytes: Vec<u8>) -> Self {
        Self::new(manifest, Arc::new(MemoryBinary::new(bytes)))
    }

    pub fn id(&self) -> &str {
        self.manifest.id()
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.manifest.id())
            .field("binary", &self.binary.describe())
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modshim_runtime::Version;
    use tempfile::TempDir;

    #[test]
    fn test_memory_binary_reads_bytes() {
        let manifest = PluginManifest::new("A", "A", Version::new(1, 0, 0));
        let candidate = Candidate::in_memory(manifest, b"MBC\x01{}".to_vec());
        assert_eq!(candidate.binary.read().unwrap(), b"MBC\x01{}");
        assert_eq!(candidate.id(), "A");
        assert!(candidate.path.is_none());
    }

    #[test]
    fn test_file_binary_missing_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let handle = FileBinary::new(temp_dir.path().join("mod.mbc"));
        assert_eq!(
            handle.read().unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_from_folder_uses_entry_point() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("mod.mbc"), b"bytes").unwrap();
        let folder = ModFolder {
            path: temp_dir.path().to_path_buf(),
            manifest: PluginManifest::new("A", "A", Version::new(1, 0, 0)),
        };

        let candidate = Candidate::from_folder(folder);
        assert_eq!(candidate.binary.read().unwrap(), b"bytes");
        assert_eq!(candidate.path.as_deref(), Some(temp_dir.path()));
    }
}
