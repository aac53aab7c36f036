//! State-file round-trip and corruption-tolerance tests.
//!
//! The persisted cache must survive serialize → deserialize → serialize
//! byte-identically, and anything unreadable must degrade to an empty
//! cache rather than failing the invocation.

mod common;

use common::AssemblyImageBuilder;
use refsolve::cache::ProbeCache;
use refsolve::metadata::PeMetadataProbe;

#[test]
fn serialize_round_trip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    for (name, version) in [("Alpha", "1.0.0.0"), ("Beta", "2.1.0.0"), ("Gamma", "0.9.0.0")] {
        AssemblyImageBuilder::new(name, version)
            .reference("Shared", "1.0.0.0")
            .write_to(dir.path());
    }

    let cache = ProbeCache::new(Box::new(PeMetadataProbe));
    for name in ["Alpha", "Beta", "Gamma"] {
        cache.lookup(&dir.path().join(format!("{name}.dll"))).unwrap();
    }

    let state_file = dir.path().join("refsolve.cache");
    assert!(cache.flush(&state_file).unwrap());
    let first_bytes = std::fs::read(&state_file).unwrap();

    // Reload, rewrite (forcing a new lookup to dirty the cache), compare.
    let (reloaded, advisory) = ProbeCache::load(Box::new(PeMetadataProbe), &state_file);
    assert!(advisory.is_none());
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.to_bytes().unwrap(), first_bytes);
}

#[test]
fn probe_results_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = AssemblyImageBuilder::new("Keeper", "3.1.4.1")
        .reference("Dep", "1.0.0.0")
        .scatter_file("Keeper.data.netmodule")
        .write_to(dir.path());

    let cache = ProbeCache::new(Box::new(PeMetadataProbe));
    let original = cache.lookup(&path).unwrap();
    let state_file = dir.path().join("refsolve.cache");
    cache.flush(&state_file).unwrap();

    let (reloaded, _) = ProbeCache::load(Box::new(PeMetadataProbe), &state_file);
    let recovered = reloaded.lookup(&path).unwrap();
    assert_eq!(original, recovered);
    assert_eq!(reloaded.probe_count(), 0, "served from the loaded cache");

    let identity = recovered.identity.unwrap();
    assert_eq!(identity.simple_name, "Keeper");
    assert_eq!(identity.version.unwrap().to_string(), "3.1.4.1");
    assert_eq!(recovered.references.len(), 1);
    assert_eq!(recovered.scatter_files, vec!["Keeper.data.netmodule"]);
}

#[test]
fn truncated_state_file_degrades_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = AssemblyImageBuilder::new("Foo", "1.0.0.0").write_to(dir.path());
    let cache = ProbeCache::new(Box::new(PeMetadataProbe));
    cache.lookup(&path).unwrap();
    let state_file = dir.path().join("refsolve.cache");
    cache.flush(&state_file).unwrap();

    // Chop the file mid-entry.
    let bytes = std::fs::read(&state_file).unwrap();
    std::fs::write(&state_file, &bytes[..bytes.len() / 2]).unwrap();

    let (reloaded, advisory) = ProbeCache::load(Box::new(PeMetadataProbe), &state_file);
    assert!(reloaded.is_empty());
    assert!(advisory.unwrap().contains("discarded"));
}

#[test]
fn stale_mtime_triggers_a_reprobe() {
    let dir = tempfile::tempdir().unwrap();
    let path = AssemblyImageBuilder::new("Foo", "1.0.0.0").write_to(dir.path());

    let cache = ProbeCache::new(Box::new(PeMetadataProbe));
    let before = cache.lookup(&path).unwrap();
    assert_eq!(before.identity.as_ref().unwrap().version.unwrap().to_string(), "1.0.0.0");
    let state_file = dir.path().join("refsolve.cache");
    cache.flush(&state_file).unwrap();

    // Replace the image with a newer version; the mtime changes.
    std::thread::sleep(std::time::Duration::from_millis(20));
    AssemblyImageBuilder::new("Foo", "2.0.0.0").write_to(dir.path());

    let (reloaded, _) = ProbeCache::load(Box::new(PeMetadataProbe), &state_file);
    let after = reloaded.lookup(&path).unwrap();
    assert_eq!(after.identity.unwrap().version.unwrap().to_string(), "2.0.0.0");
    assert_eq!(reloaded.probe_count(), 1);
    assert!(reloaded.is_dirty());
}
