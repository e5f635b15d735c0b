//! Integration tests for modshim-runtime.
//!
//! These tests cover:
//! - Discovering a realistic mods folder
//! - Loading the binary a discovered manifest points at

use modshim_runtime::binary::{BinaryMetadata, Function, Instruction};
use modshim_runtime::{
    discover_mods, BinaryLoader, DiscoveredMod, FailReason, PluginBinary, Symbol, Version,
};
use std::path::Path;
use tempfile::TempDir;

// ==============================================================================
// Test Fixture Helpers
// ==============================================================================

fn write(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn sample_binary() -> PluginBinary {
    PluginBinary {
        version: 1,
        metadata: BinaryMetadata {
            plugin_id: "Cat.Chests".to_string(),
            plugin_version: "2.0.1".to_string(),
            host_version: Some("1.5.6".to_string()),
            compiler_version: Some("modc 0.4".to_string()),
        },
        constants: Vec::new(),
        types: Vec::new(),
        functions: vec![Function {
            name: "Entry".to_string(),
            owner: None,
            params: vec!["Host.ModHelper".to_string()],
            returns: "void".to_string(),
            local_count: 0,
            instructions: vec![
                Instruction::LoadArg { index: 0 },
                Instruction::CallVirtual {
                    method: Symbol::parse("Host.ModHelper::ready() -> void").unwrap(),
                },
                Instruction::Return,
            ],
        }],
        entry_point: "Entry".to_string(),
    }
}

fn build_mods_folder(root: &Path) {
    let manifest = br#"
[plugin]
id = "Cat.Chests"
name = "Chests Anywhere"
version = "2.0.1"
entry_point = "ChestsAnywhere.mbc"
update_keys = ["Nexus:518"]

[[dependency]]
id = "Cat.Common"
min_version = "1.1"

[[dependency]]
id = "Cat.Menus"
required = false
"#;
    write(&root.join("ChestsAnywhere/manifest.toml"), manifest);
    let bytes = BinaryLoader::to_bytes(&sample_binary()).unwrap();
    write(&root.join("ChestsAnywhere/ChestsAnywhere.mbc"), &bytes);

    write(&root.join("Portraits/portraits.xnb"), b"xnb");
    write(&root.join("Readme Only/README.md"), b"# hi");
    write(&root.join(".Hidden/manifest.toml"), b"not even toml");
}

// ==============================================================================
// Discovery
// ==============================================================================

#[test]
fn test_discover_mods_folder() {
    let temp_dir = TempDir::new().unwrap();
    build_mods_folder(temp_dir.path());

    let discovered = discover_mods(temp_dir.path()).unwrap();
    assert_eq!(discovered.len(), 4);

    let mut candidates = Vec::new();
    let mut rejected = Vec::new();
    for entry in discovered {
        match entry {
            DiscoveredMod::Candidate(folder) => candidates.push(folder),
            DiscoveredMod::Rejected(folder) => rejected.push((folder.display_name(), folder.reason)),
        }
    }

    assert_eq!(
        rejected,
        vec![
            (".Hidden".to_string(), FailReason::DisabledByConvention),
            ("Portraits".to_string(), FailReason::UnsupportedFormat),
            ("Readme Only".to_string(), FailReason::EmptyOrIgnoredContent),
        ]
    );

    assert_eq!(candidates.len(), 1);
    let chests = &candidates[0];
    assert_eq!(chests.id(), "Cat.Chests");
    assert_eq!(chests.manifest.version(), &Version::new(2, 0, 1));
    assert_eq!(chests.manifest.dependencies.len(), 2);
    assert!(chests.manifest.dependencies[0].required);
    assert!(!chests.manifest.dependencies[1].required);
    assert!(chests.manifest.warnings().is_empty());
}

#[test]
fn test_missing_mods_folder_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let discovered = discover_mods(&temp_dir.path().join("Mods")).unwrap();
    assert!(discovered.is_empty());
}

// ==============================================================================
// Binary Loading
// ==============================================================================

#[test]
fn test_load_discovered_entry_point() {
    let temp_dir = TempDir::new().unwrap();
    build_mods_folder(temp_dir.path());

    let folder = match discover_mods(temp_dir.path())
        .unwrap()
        .into_iter()
        .find(|d| matches!(d, DiscoveredMod::Candidate(_)))
    {
        Some(DiscoveredMod::Candidate(folder)) => folder,
        _ => panic!("expected a candidate"),
    };

    let binary = BinaryLoader::load(&folder.entry_point_path()).unwrap();
    assert_eq!(binary, sample_binary());
    assert_eq!(binary.metadata.plugin_id, folder.id());

    let (symbol, _) = binary.functions[0].instructions[1].symbol().unwrap();
    assert!(binary.is_external(symbol));
}
