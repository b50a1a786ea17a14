use crate::manifest::{
    assemble_files, load_manifest, manifest_file_name, manifest_path_in_package, new_manifest,
    package_name, parse_package_name, physical_files, reference_package, resolve_references,
    save_manifest, will_split,
};
use crate::testutil::{stored_node, utc};

use beanckup_types::{Episode, EpisodeStatus, FileNode, Plan};

#[test]
fn package_name_embeds_session_episode_and_clock() {
    let name = package_name("photos", 3, 12, utc(1_735_689_600)); // 2025-01-01 00:00:00 UTC
    assert_eq!(name, "photos-S03E12-250101_000000.7z");
    assert_eq!(parse_package_name(&name), Some((3, 12)));
}

#[test]
fn parse_accepts_separator_variants() {
    assert_eq!(parse_package_name("ws-S01E02-250101_000000.7z"), Some((1, 2)));
    assert_eq!(parse_package_name("ws_S01_E02_250101.7z"), Some((1, 2)));
    assert_eq!(parse_package_name("ws-S10-E07.7z.001"), Some((10, 7)));
    assert_eq!(parse_package_name("no-session-here.7z"), None);
}

#[test]
fn manifest_names_derive_from_package() {
    assert_eq!(
        manifest_file_name("ws-S01E01-250101_000000.7z"),
        "ws-S01E01-250101_000000.json"
    );
    assert_eq!(
        manifest_path_in_package("ws-S01E01-250101_000000.7z"),
        ".beanckup/ws-S01E01-250101_000000.json"
    );
}

#[test]
fn split_decision() {
    assert!(!will_split(0, u64::MAX));
    assert!(!will_split(10, 10 * 1024 * 1024));
    assert!(will_split(10, 10 * 1024 * 1024 + 1));

    assert_eq!(reference_package("p.7z", false), "p.7z");
    assert_eq!(reference_package("p.7z", true), "p.7z.001");
}

#[test]
fn resolve_assigns_own_package_and_dedups() {
    let mut files = vec![
        FileNode {
            path: "a.txt".into(),
            size: 5,
            hash: "same".into(),
            ..FileNode::default()
        },
        FileNode {
            path: "b.txt".into(),
            size: 5,
            hash: "same".into(),
            ..FileNode::default()
        },
        FileNode {
            path: "c.txt".into(),
            size: 2,
            hash: "other".into(),
            ..FileNode::default()
        },
    ];

    resolve_references(&mut files, "ws-S01E01-250101_000000.7z", false);

    assert_eq!(files[0].reference, "ws-S01E01-250101_000000.7z/a.txt");
    // The duplicate points at the original's storage, not its own path.
    assert_eq!(files[1].reference, "ws-S01E01-250101_000000.7z/a.txt");
    assert_eq!(files[2].reference, "ws-S01E01-250101_000000.7z/c.txt");

    let physical = physical_files(&files, "ws-S01E01-250101_000000.7z", false);
    let paths: Vec<&str> = physical.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(paths, vec!["a.txt", "c.txt"]);
}

#[test]
fn resolve_keeps_existing_references_and_split_suffix() {
    let mut files = vec![
        stored_node("old.txt", 3, "hh", "ws-S01E01-250101_000000.7z/old.txt"),
        FileNode {
            path: "huge.bin".into(),
            size: 50,
            hash: "big".into(),
            ..FileNode::default()
        },
    ];

    resolve_references(&mut files, "ws-S02E01-250202_000000.7z", true);

    assert_eq!(files[0].reference, "ws-S01E01-250101_000000.7z/old.txt");
    assert_eq!(files[1].reference, "ws-S02E01-250202_000000.7z.001/huge.bin");
}

#[test]
fn first_episode_manifest_carries_the_reference_graph() {
    let ep1 = Episode {
        id: 1,
        total_size: 5,
        files: vec![stored_node("new1.txt", 5, "h1", "ws-S02E01-250202_000000.7z/new1.txt")],
        status: EpisodeStatus::InProgress,
    };
    let ep2 = Episode {
        id: 2,
        total_size: 7,
        files: vec![stored_node("new2.txt", 7, "h2", "ws-S02E02-250202_000001.7z/new2.txt")],
        status: EpisodeStatus::Pending,
    };
    let plan = Plan {
        session_id: 2,
        timestamp: utc(1_700_000_000),
        total_new_size: 12,
        package_size_limit_mb: 0,
        episodes: vec![ep1.clone(), ep2.clone()],
        all_nodes: vec![
            stored_node("moved.txt", 4, "hm", "ws-S01E01-250101_000000.7z/orig.txt"),
            FileNode::directory("sub", None, None),
        ],
        status_file_path: None,
    };

    let first = assemble_files(&plan, &ep1);
    let mut first_paths: Vec<&str> = first.iter().map(|n| n.path.as_str()).collect();
    first_paths.sort_unstable();
    assert_eq!(first_paths, vec!["moved.txt", "new1.txt"]);

    let second = assemble_files(&plan, &ep2);
    let second_paths: Vec<&str> = second.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(second_paths, vec!["new2.txt"]);

    // Every manifest entry is physically placed somewhere.
    assert!(first.iter().chain(second.iter()).all(|n| !n.reference.is_empty()));
}

#[test]
fn save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let m = new_manifest(
        "ws",
        1,
        1,
        "ws-S01E01-250101_000000.7z".into(),
        vec![stored_node("a.txt", 5, "ha", "ws-S01E01-250101_000000.7z/a.txt")],
        utc(1_735_689_600),
    );

    let path = save_manifest(&m, dir.path()).unwrap();
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "ws-S01E01-250101_000000.json"
    );

    let back = load_manifest(&path).unwrap();
    assert_eq!(back.workspace_name, "ws");
    assert_eq!(back.session_id, 1);
    assert_eq!(back.package_name, m.package_name);
    assert_eq!(back.timestamp, m.timestamp);
    assert_eq!(back.files.len(), 1);
    assert_eq!(back.files[0].path, "a.txt");
}
