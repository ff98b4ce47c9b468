use std::fs;
use std::path::Path;
use storecopy::compare::compare_stores;
use storecopy::config::CopyConfig;
use storecopy::errorlog::error_log_path;
use storecopy::idmap::{id_map_path, IdMap};
use storecopy::index_files::{INDEX_DIR, INDEX_FILE};
use storecopy::model::PropertyValue;
use storecopy::pipeline::run_copy;
use storecopy::store::snapshot::{detect_format, open_snapshot, save_snapshot, snapshot_path};
use storecopy::store::{open_source, MemoryGraph, SourceReader, StoreFormat};
use tempfile::TempDir;

fn social_graph() -> MemoryGraph {
    let mut graph = MemoryGraph::new();
    let ada = graph.add_node(
        &["Person"],
        vec![("name", "ada".into()), ("born", PropertyValue::Int(1815))],
    );
    let alan = graph.add_node(&["Person"], vec![("name", "alan".into())]);
    let root = graph.add_node(&["Person", "Admin"], vec![("name", "root".into())]);
    let gone = graph.add_node(&["Person"], vec![]);
    let grace = graph.add_node(&["Person", "Navy"], vec![("name", "grace".into())]);
    graph.delete_node(gone);
    graph.add_relationship(ada, alan, "KNOWS", vec![("since", PropertyValue::Int(1936))]);
    graph.add_relationship(alan, root, "KNOWS", vec![]);
    graph.add_relationship(grace, ada, "ADMIRES", vec![]);
    graph.add_relationship(grace, alan, "FOLLOWS", vec![]);
    graph
}

fn write_source(dir: &Path, format: StoreFormat) {
    save_snapshot(&social_graph(), dir, format).unwrap();
    fs::write(dir.join(INDEX_FILE), b"index").unwrap();
    fs::create_dir_all(dir.join(INDEX_DIR).join("schema")).unwrap();
    fs::write(dir.join(INDEX_DIR).join("schema").join("1.idx"), b"entries").unwrap();
}

fn config(source: &Path, target: &Path) -> CopyConfig {
    CopyConfig {
        source_dir: Some(source.to_path_buf()),
        target_dir: Some(target.to_path_buf()),
        labels_to_delete: vec!["Admin".into()],
        rel_types_to_ignore: vec!["follows".into()],
        batch_size: 2,
        threads: 2,
        ..CopyConfig::default()
    }
}

#[test]
fn copies_snapshot_store_end_to_end() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    let target = dir.path().join("target");
    write_source(&source, StoreFormat::V2);

    let report = run_copy(
        &CopyConfig {
            persist_id_map: true,
            ..config(&source, &target)
        },
        false,
    )
    .unwrap();

    assert_eq!(report.nodes.loaded, 3);
    assert_eq!(report.nodes.totals.removed, 1);
    assert_eq!(report.nodes.totals.not_found, 1);
    assert_eq!(report.relationships.loaded, 2);
    assert_eq!(report.relationships.totals.removed, 2);
    assert_eq!(report.index_files_copied, 2);

    let copied = open_snapshot(&target).unwrap();
    assert_eq!(copied.node_count(), 3);
    assert!(copied.node(2).is_none());
    assert_eq!(copied.label_names(4), vec!["Person", "Navy"]);
    assert_eq!(fs::read(target.join(INDEX_FILE)).unwrap(), b"index");
    assert!(target.join(INDEX_DIR).join("schema").join("1.idx").is_file());

    let id_map = IdMap::load(&id_map_path(&target)).unwrap();
    assert_eq!(id_map.sorted_entries(), vec![(0, 0), (1, 1), (4, 4)]);
    assert!(error_log_path(&target).is_file());
    assert_eq!(fs::read_to_string(error_log_path(&target)).unwrap(), "");
}

#[test]
fn copy_between_revisions() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    let target = dir.path().join("target");
    write_source(&source, StoreFormat::V1);

    run_copy(
        &CopyConfig {
            target_format: StoreFormat::V2,
            ..config(&source, &target)
        },
        false,
    )
    .unwrap();

    assert_eq!(detect_format(&source).unwrap(), StoreFormat::V1);
    assert_eq!(detect_format(&target).unwrap(), StoreFormat::V2);
    let copied = open_snapshot(&target).unwrap();
    let ada = copied.node(0).unwrap();
    assert_eq!(
        copied.named_properties(&ada.properties),
        vec![
            ("born".to_string(), PropertyValue::Int(1815)),
            ("name".to_string(), PropertyValue::from("ada")),
        ]
    );
}

#[test]
fn compacted_copy_skips_index_files() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    let target = dir.path().join("target");
    write_source(&source, StoreFormat::V2);

    let report = run_copy(
        &CopyConfig {
            keep_node_ids: false,
            ..config(&source, &target)
        },
        false,
    )
    .unwrap();

    assert_eq!(report.index_files_copied, 0);
    assert!(!target.join(INDEX_FILE).exists());
    assert!(!target.join(INDEX_DIR).exists());
    let copied = open_snapshot(&target).unwrap();
    assert_eq!(copied.node_count(), 3);
    assert_eq!(copied.highest_node_id().unwrap(), Some(2));
}

#[test]
fn existing_target_requires_overwrite() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    let target = dir.path().join("target");
    write_source(&source, StoreFormat::V2);
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("stale"), b"old").unwrap();

    let err = run_copy(&config(&source, &target), false).unwrap_err();
    assert!(format!("{err:#}").contains("already exists"));
    assert!(target.join("stale").exists());

    run_copy(
        &CopyConfig {
            overwrite: true,
            ..config(&source, &target)
        },
        false,
    )
    .unwrap();
    assert!(!target.join("stale").exists());
    assert_eq!(open_snapshot(&target).unwrap().node_count(), 3);
}

#[test]
fn overwrite_never_deletes_the_source() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("store");
    write_source(&source, StoreFormat::V2);

    let spellings = [
        dir.path().join("sub").join("..").join("store"),
        source.join("."),
        source.join("nested-copy"),
    ];
    for target in &spellings {
        let err = run_copy(
            &CopyConfig {
                overwrite: true,
                ..config(&source, target)
            },
            false,
        )
        .unwrap_err();
        let message = format!("{err:#}");
        assert!(
            message.contains("different directories")
                || message.contains("inside the source store"),
            "{message}"
        );
        assert!(snapshot_path(&source).is_file());
    }

    let graph = open_snapshot(&source).unwrap();
    assert_eq!(graph.node_count(), 4);
    assert!(source.join(INDEX_FILE).is_file());
}

#[test]
fn target_containing_the_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("stores").join("graph");
    write_source(&source, StoreFormat::V2);

    let target = dir.path().join("stores");
    let err = run_copy(
        &CopyConfig {
            overwrite: true,
            ..config(&source, &target)
        },
        false,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("inside the target directory"));
    assert!(snapshot_path(&source).is_file());
}

#[test]
fn missing_source_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("nowhere");
    let target = dir.path().join("target");

    let err = run_copy(&config(&source, &target), false).unwrap_err();
    assert!(format!("{err:#}").contains("source store does not exist"));
    assert!(!target.exists());
}

#[test]
fn error_log_can_live_outside_the_target() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    let target = dir.path().join("target");
    let logs = dir.path().join("logs");
    write_source(&source, StoreFormat::V2);

    run_copy(
        &CopyConfig {
            log_dir: Some(logs.clone()),
            ..config(&source, &target)
        },
        false,
    )
    .unwrap();

    assert!(error_log_path(&logs).is_file());
    assert!(!error_log_path(&target).exists());
}

#[test]
fn report_is_written_as_json() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    let target = dir.path().join("target");
    write_source(&source, StoreFormat::V2);

    let report = run_copy(&config(&source, &target), false).unwrap();
    let path = dir.path().join("report.json");
    report.write_json(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["nodes"]["loaded"], 3);
    assert_eq!(json["relationships"]["outcome"], "ok");
    assert_eq!(json["keep_node_ids"], true);
}

#[test]
fn copied_store_compares_equal_under_the_same_filters() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    let target = dir.path().join("target");
    write_source(&source, StoreFormat::V2);
    let config = config(&source, &target);
    run_copy(&config, false).unwrap();

    let source_store = open_source(&source).unwrap();
    let target_store = open_source(&target).unwrap();
    let comparison = compare_stores(
        source_store.as_ref(),
        target_store.as_ref(),
        &config.filters(),
        2,
        true,
    )
    .unwrap();

    assert!(comparison.is_match(), "differences: {:?}", comparison.differences);
    assert_eq!(comparison.target.nodes, 3);
    assert_eq!(comparison.target.labels.get("Navy"), Some(&1));

    let unfiltered = compare_stores(
        source_store.as_ref(),
        target_store.as_ref(),
        &CopyConfig::default().filters(),
        2,
        true,
    )
    .unwrap();
    assert!(!unfiltered.is_match());
}
