//! Mod discovery from a mods folder.
//!
//! Each sub-folder of the mods folder is a mod candidate. A candidate is a
//! folder containing a `manifest.toml` file and the compiled entry point it
//! names. Folders that can't be candidates are reported with the reason they
//! were rejected instead of being silently skipped:
//!
//! - a folder name starting with `.` is disabled by convention
//! - a folder with nothing but ignored files is empty
//! - a folder with only `.xnb` content files is an unsupported format
//! - a folder without a manifest but with sub-folders is searched one level
//!   deeper, so mod packs unpack to several candidates

use crate::error::RuntimeResult;
use crate::fail_reason::FailReason;
use crate::manifest::PluginManifest;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Manifest file name inside a mod folder.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// A mod folder with a valid manifest.
#[derive(Debug, Clone)]
pub struct ModFolder {
    /// Path to the mod directory.
    pub path: PathBuf,

    /// Parsed manifest.
    pub manifest: PluginManifest,
}

impl ModFolder {
    pub fn id(&self) -> &str {
        self.manifest.id()
    }

    pub fn name(&self) -> &str {
        &self.manifest.plugin.name
    }

    /// Get the path to the entry point file.
    pub fn entry_point_path(&self) -> PathBuf {
        self.path.join(self.manifest.entry_point())
    }
}

/// A folder that could not become a mod candidate.
#[derive(Debug, Clone)]
pub struct RejectedFolder {
    pub path: PathBuf,
    pub reason: FailReason,
    pub detail: String,
}

impl RejectedFolder {
    /// Folder name used to identify the rejection.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Result of examining one folder.
#[derive(Debug, Clone)]
pub enum DiscoveredMod {
    Candidate(ModFolder),
    Rejected(RejectedFolder),
}

/// Get the default mods directory.
pub fn default_mods_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "raibid-labs", "modshim")
        .map(|dirs| dirs.data_dir().join("mods"))
}

/// Discover all mod folders under a directory, sorted by path.
pub fn discover_mods(dir: &Path) -> RuntimeResult<Vec<DiscoveredMod>> {
    let mut discovered = Vec::new();

    if !dir.exists() {
        warn!("Mods directory {:?} does not exist", dir);
        return Ok(discovered);
    }

    for path in sorted_subdirectories(dir)? {
        examine_folder(&path, true, &mut discovered);
    }

    let candidates = discovered
        .iter()
        .filter(|d| matches!(d, DiscoveredMod::Candidate(_)))
        .count();
    info!(
        "Discovered {} mod folder(s), {} candidate(s)",
        discovered.len(),
        candidates
    );
    Ok(discovered)
}

/// Read a single mod folder that is expected to hold a manifest.
pub fn discover_mod(path: &Path) -> RuntimeResult<ModFolder> {
    let manifest = PluginManifest::from_file(&path.join(MANIFEST_FILE))?;
    Ok(ModFolder {
        path: path.to_path_buf(),
        manifest,
    })
}

fn examine_folder(path: &Path, allow_nested: bool, discovered: &mut Vec<DiscoveredMod>) {
    let reject = |reason: FailReason, detail: String| {
        debug!("Rejected {:?}: {} ({})", path, reason, detail);
        DiscoveredMod::Rejected(RejectedFolder {
            path: path.to_path_buf(),
            reason,
            detail,
        })
    };

    let folder_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if folder_name.starts_with('.') {
        discovered.push(reject(
            FailReason::DisabledByConvention,
            "folder name starts with a dot".to_string(),
        ));
        return;
    }

    if path.join(MANIFEST_FILE).is_file() {
        discovered.push(match discover_mod(path) {
            Ok(folder) if !folder.entry_point_path().is_file() => reject(
                FailReason::InvalidManifest,
                format!("entry point '{}' not found", folder.manifest.entry_point()),
            ),
            Ok(folder) => {
                debug!(
                    "Discovered mod: {} v{} at {:?}",
                    folder.name(),
                    folder.manifest.version(),
                    path
                );
                DiscoveredMod::Candidate(folder)
            }
            Err(e) => reject(FailReason::InvalidManifest, e.to_string()),
        });
        return;
    }

    let files = match content_files(path) {
        Ok(files) => files,
        Err(e) => {
            discovered.push(reject(FailReason::InvalidManifest, e.to_string()));
            return;
        }
    };

    if files.is_empty() {
        discovered.push(reject(
            FailReason::EmptyOrIgnoredContent,
            "folder is empty or contains only ignored files".to_string(),
        ));
        return;
    }

    if files.iter().all(|file| has_extension(file, "xnb")) {
        discovered.push(reject(
            FailReason::UnsupportedFormat,
            "folder contains XNB content files, which can't be loaded as a mod".to_string(),
        ));
        return;
    }

    if allow_nested {
        let nested = sorted_subdirectories(path).unwrap_or_default();
        if !nested.is_empty() {
            debug!("Searching {:?} as a mod pack", path);
            for child in nested {
                examine_folder(&child, false, discovered);
            }
            return;
        }
    }

    discovered.push(reject(
        FailReason::InvalidManifest,
        format!("missing {}", MANIFEST_FILE),
    ));
}

fn sorted_subdirectories(dir: &Path) -> RuntimeResult<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Recursively list files that aren't ignored.
fn content_files(dir: &Path) -> RuntimeResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if !is_ignored_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_ignored_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.starts_with('.')
        || name == "thumbs.db"
        || name == "desktop.ini"
        || has_extension(path, "md")
        || has_extension(path, "txt")
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_mod(dir: &Path, folder: &str, id: &str) {
        let mod_dir = dir.join(folder);
        std::fs::create_dir_all(&mod_dir).unwrap();

        let manifest = format!(
            r#"
[plugin]
id = "{id}"
name = "Test Mod {id}"
version = "0.1.0"
"#
        );
        std::fs::write(mod_dir.join(MANIFEST_FILE), manifest).unwrap();
        std::fs::write(mod_dir.join("mod.mbc"), b"placeholder").unwrap();
    }

    fn reasons(discovered: &[DiscoveredMod]) -> Vec<Option<FailReason>> {
        discovered
            .iter()
            .map(|d| match d {
                DiscoveredMod::Candidate(_) => None,
                DiscoveredMod::Rejected(r) => Some(r.reason),
            })
            .collect()
    }

    #[test]
    fn test_discover_candidates_sorted() {
        let temp_dir = TempDir::new().unwrap();
        create_test_mod(temp_dir.path(), "b-mod", "B");
        create_test_mod(temp_dir.path(), "a-mod", "A");

        let discovered = discover_mods(temp_dir.path()).unwrap();
        let ids: Vec<&str> = discovered
            .iter()
            .filter_map(|d| match d {
                DiscoveredMod::Candidate(c) => Some(c.id()),
                DiscoveredMod::Rejected(_) => None,
            })
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_rejections() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        create_test_mod(root, ".disabled", "Hidden");

        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("empty/README.md"), "hi").unwrap();

        std::fs::create_dir_all(root.join("xnb")).unwrap();
        std::fs::write(root.join("xnb/hat.xnb"), b"xnb").unwrap();

        std::fs::create_dir_all(root.join("nomanifest")).unwrap();
        std::fs::write(root.join("nomanifest/mod.mbc"), b"x").unwrap();

        let discovered = discover_mods(root).unwrap();
        assert_eq!(
            reasons(&discovered),
            vec![
                Some(FailReason::DisabledByConvention),
                Some(FailReason::EmptyOrIgnoredContent),
                Some(FailReason::InvalidManifest),
                Some(FailReason::UnsupportedFormat),
            ]
        );
    }

    #[test]
    fn test_missing_entry_point_is_invalid_manifest() {
        let temp_dir = TempDir::new().unwrap();
        create_test_mod(temp_dir.path(), "m", "M");
        std::fs::remove_file(temp_dir.path().join("m/mod.mbc")).unwrap();

        let discovered = discover_mods(temp_dir.path()).unwrap();
        assert_eq!(reasons(&discovered), vec![Some(FailReason::InvalidManifest)]);
    }

    #[test]
    fn test_mod_pack_is_searched() {
        let temp_dir = TempDir::new().unwrap();
        let pack = temp_dir.path().join("pack");
        create_test_mod(&pack, "one", "One");
        create_test_mod(&pack, "two", "Two");

        let discovered = discover_mods(temp_dir.path()).unwrap();
        assert_eq!(reasons(&discovered), vec![None, None]);
    }
}
