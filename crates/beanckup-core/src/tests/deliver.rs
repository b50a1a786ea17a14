use crate::deliver::{DeliveryParams, DeliverySession};
use crate::plan::create_plan;
use crate::testutil::{utc, write_file};
use crate::workspace::Workspace;

use beanckup_types::{EpisodeStatus, FileNode, Plan};

fn params(delivery_dir: std::path::PathBuf) -> DeliveryParams {
    DeliveryParams {
        delivery_dir,
        total_size_limit_mb: 0,
        compression_level: 0,
        password: None,
    }
}

fn two_episode_plan() -> Plan {
    let nodes = vec![
        FileNode {
            path: "a.txt".into(),
            size: 700 * 1024,
            hash: "ha".into(),
            ..FileNode::default()
        },
        FileNode {
            path: "b.txt".into(),
            size: 700 * 1024,
            hash: "hb".into(),
            ..FileNode::default()
        },
    ];
    create_plan(1, nodes, 1, utc(1_735_689_600))
}

#[test]
fn crash_recovery_cleans_interrupted_episode() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path());
    let delivery = dir.path().join("delivery");
    std::fs::create_dir_all(&delivery).unwrap();

    let mut plan = two_episode_plan();
    plan.episodes[0].status = EpisodeStatus::Completed;
    plan.episodes[1].status = EpisodeStatus::InProgress;

    // Leftovers from the run that died: the interrupted episode's manifest
    // and partial archive volumes, plus the completed episode's valid pair.
    let meta = ws.ensure_meta_dir().unwrap();
    write_file(&meta, "ws-S01E01-250601_090000.json", b"{}");
    write_file(&meta, "ws-S01E02-250601_101010.json", b"{}");
    write_file(&delivery, "ws-S01E01-250601_090000.7z", b"done");
    write_file(&delivery, "ws-S01E02-250601_101010.7z.001", b"partial");
    write_file(&delivery, "ws-S01E02-250601_101010.7z.002", b"partial");
    write_file(&delivery, "other-S02E01-250601_110000.7z", b"unrelated");

    let mut session = DeliverySession::new(&ws, plan, params(delivery.clone())).unwrap();
    session.recover_interrupted().unwrap();

    assert_eq!(session.plan().episodes[1].status, EpisodeStatus::Pending);
    // Stale manifest gone, completed episode's manifest kept.
    assert!(!meta.join("ws-S01E02-250601_101010.json").exists());
    assert!(meta.join("ws-S01E01-250601_090000.json").exists());
    // Partial archive volumes gone, completed archive and other sessions kept.
    assert!(!delivery.join("ws-S01E02-250601_101010.7z.001").exists());
    assert!(!delivery.join("ws-S01E02-250601_101010.7z.002").exists());
    assert!(delivery.join("ws-S01E01-250601_090000.7z").exists());
    assert!(delivery.join("other-S02E01-250601_110000.7z").exists());
    // The reset state was persisted.
    assert!(session.plan().status_file_path.is_some());
}

#[test]
fn recovery_without_interruptions_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path());
    let delivery = dir.path().join("delivery");

    let plan = two_episode_plan();
    let mut session = DeliverySession::new(&ws, plan, params(delivery)).unwrap();
    session.recover_interrupted().unwrap();

    assert!(session
        .plan()
        .episodes
        .iter()
        .all(|e| e.status == EpisodeStatus::Pending));
    // Nothing was persisted: no episode needed resetting.
    assert!(session.plan().status_file_path.is_none());
}

#[test]
fn reassess_applies_the_run_cap() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path());

    let mut session = DeliverySession::new(
        &ws,
        two_episode_plan(),
        DeliveryParams {
            delivery_dir: dir.path().join("delivery"),
            total_size_limit_mb: 1,
            compression_level: 0,
            password: None,
        },
    )
    .unwrap();

    session.reassess();
    assert_eq!(session.pending_episode_ids(), vec![1]);
    assert_eq!(session.plan().episodes[1].status, EpisodeStatus::ExceededLimit);
}

#[test]
fn failed_episode_returns_to_pending_and_drops_its_manifest() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.txt", b"content-a");
    let ws = Workspace::new(dir.path());

    // A file where the delivery directory should be makes its creation
    // fail before the archiver is ever invoked.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"in the way").unwrap();
    let delivery = blocker.join("delivery");

    let nodes = vec![FileNode {
        path: "a.txt".into(),
        size: 9,
        hash: "ha".into(),
        ..FileNode::default()
    }];
    let plan = create_plan(1, nodes, 0, utc(1_735_689_600));

    let mut session = DeliverySession::new(&ws, plan, params(delivery)).unwrap();
    let err = session.deliver_episode(1, &mut |_| {}).unwrap_err();
    assert!(matches!(
        err,
        crate::error::BeanckupError::Io(_) | crate::error::BeanckupError::Subprocess(_)
    ));

    assert_eq!(session.plan().episodes[0].status, EpisodeStatus::Pending);
    // The manifest written for the failed attempt was cleaned up.
    let meta = ws.meta_dir();
    let leftover_manifests: Vec<_> = std::fs::read_dir(&meta)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(crate::history::is_manifest_file_name)
        })
        .collect();
    assert!(leftover_manifests.is_empty());
}

#[test]
fn deferred_episodes_are_persisted_for_later_runs() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path());

    // A cap too small for anything: every episode defers, nothing runs,
    // and the plan still has to reach disk for the next run to pick up.
    let mut session = DeliverySession::new(
        &ws,
        two_episode_plan(),
        DeliveryParams {
            delivery_dir: dir.path().join("delivery"),
            total_size_limit_mb: 1,
            compression_level: 0,
            password: None,
        },
    )
    .unwrap();
    session.reassess();
    session.persist().unwrap();

    let resumed = crate::session::find_resumable_plan(&ws.meta_dir())
        .unwrap()
        .unwrap();
    assert_eq!(resumed.episodes[0].status, EpisodeStatus::Pending);
    assert_eq!(resumed.episodes[1].status, EpisodeStatus::ExceededLimit);
}

#[test]
fn unknown_episode_id_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path());
    let mut session =
        DeliverySession::new(&ws, two_episode_plan(), params(dir.path().join("d"))).unwrap();
    assert!(session.deliver_episode(99, &mut |_| {}).is_err());
}

#[test]
fn finish_reports_false_while_work_remains() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path());
    let mut session =
        DeliverySession::new(&ws, two_episode_plan(), params(dir.path().join("d"))).unwrap();
    assert!(!session.finish().unwrap());
}
