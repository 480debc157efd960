use std::path::{Path, PathBuf};

use rusqlite::Connection;
use uuid::Uuid;

use super::{Workspace, WorkspaceError};
use crate::dbfile;
use crate::meta;

fn unique_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("dbranch-ws-test-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&root).expect("workspace root should be creatable");
    root
}

fn open_workspace(root: &Path) -> Workspace {
    Workspace::open(root).expect("workspace should open")
}

fn branch_conn(root: &Path, file_name: &str) -> Connection {
    dbfile::open_branch_connection(&root.join(file_name)).expect("branch db should open")
}

fn row_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })
    .expect("count query should run")
}

#[test]
fn seeds_exactly_one_main_with_null_parent() {
    let root = unique_root();
    let ws = open_workspace(&root);

    let listing = ws.branch_list().expect("listing should succeed");
    assert_eq!(listing.current, "main");
    assert_eq!(listing.branches.len(), 1);

    let main = &listing.branches[0];
    assert_eq!(main.name, "main");
    assert!(main.created_from.is_none(), "main has no parent");
    assert!(main.is_current);
    assert!(root.join(&main.file_name).exists());

    // Reopen must not seed a second main.
    drop(ws);
    let ws = open_workspace(&root);
    assert_eq!(
        ws.branch_list().expect("listing should succeed").branches.len(),
        1
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn non_main_branches_always_record_their_base() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    let dev = ws
        .branch_create("dev", "main", Some("scratch"))
        .expect("create should succeed");
    assert_eq!(dev.created_from.as_deref(), Some("main"));
    assert!(!dev.is_current, "create does not switch");

    let err = ws
        .branch_create("orphan", "ghost", None)
        .expect_err("missing base should fail");
    assert!(matches!(err, WorkspaceError::NotFound(_)), "got: {err}");

    let err = ws
        .branch_create("bad name", "main", None)
        .expect_err("invalid name should fail");
    assert!(matches!(err, WorkspaceError::InvalidArgument(_)), "got: {err}");

    let err = ws
        .branch_create("dev", "main", None)
        .expect_err("duplicate name should fail");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn branch_copy_is_faithful_and_isolated_afterwards() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.migration_apply("001_init.sql")
        .expect("apply should succeed");
    {
        let conn = branch_conn(&root, "main.db");
        conn.execute_batch("INSERT INTO t VALUES (1), (2);")
            .expect("seed rows should insert");
    }

    ws.branch_create("dev", "main", None)
        .expect("create should succeed");

    // Copy fidelity at the checkpoint instant.
    {
        let dev = branch_conn(&root, "dev.db");
        assert_eq!(row_count(&dev, "t"), 2);
    }

    // Writes to dev stay in dev.
    {
        let dev = branch_conn(&root, "dev.db");
        dev.execute_batch("INSERT INTO t VALUES (3);")
            .expect("dev insert should succeed");
    }
    let main = branch_conn(&root, "main.db");
    assert_eq!(row_count(&main, "t"), 2, "main must not see dev writes");
    let dev = branch_conn(&root, "dev.db");
    assert_eq!(row_count(&dev, "t"), 3);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn fresh_branch_from_empty_main_starts_empty() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    // The scenario from the branch-isolation property: table exists in
    // dev only after dev applies the migration itself.
    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.branch_create("dev", "main", None)
        .expect("create should succeed");
    ws.branch_switch("dev").expect("switch should succeed");
    ws.migration_apply("001_init.sql")
        .expect("apply in dev should succeed");
    {
        let dev = branch_conn(&root, "dev.db");
        dev.execute_batch("INSERT INTO t VALUES (42);")
            .expect("dev insert should succeed");
    }

    ws.branch_switch("main").expect("switch back should succeed");
    assert_eq!(ws.current_branch().expect("pointer should read"), "main");

    let main = branch_conn(&root, "main.db");
    let table_in_main: i64 = main
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='t')",
            [],
            |row| row.get(0),
        )
        .expect("existence query should run");
    assert_eq!(table_in_main, 0, "main never applied the migration");
    let dev = branch_conn(&root, "dev.db");
    assert_eq!(row_count(&dev, "t"), 1);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn apply_is_idempotent_per_branch_and_executes_once() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create(
        "seed",
        "CREATE TABLE IF NOT EXISTS hits(n INTEGER); INSERT INTO hits VALUES (1);",
    )
    .expect("migration create should succeed");

    ws.migration_apply("001_seed.sql")
        .expect("first apply should succeed");
    let err = ws
        .migration_apply("001_seed.sql")
        .expect_err("second apply should conflict");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    let main = branch_conn(&root, "main.db");
    assert_eq!(
        row_count(&main, "hits"),
        1,
        "the counting side effect ran exactly once"
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn migration_delete_protection_is_sticky_across_branch_delete() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.branch_create("dev", "main", None)
        .expect("create should succeed");
    ws.branch_switch("dev").expect("switch should succeed");
    ws.migration_apply("001_init.sql")
        .expect("apply in dev should succeed");

    let err = ws
        .migration_delete("001_init.sql")
        .expect_err("applied migration must not delete");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    ws.branch_switch("main").expect("switch should succeed");
    ws.branch_delete("dev").expect("delete should succeed");

    let err = ws
        .migration_delete("001_init.sql")
        .expect_err("history is sticky after branch delete");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    let status = ws
        .migration_status("001_init.sql")
        .expect("status should succeed");
    assert!(!status.can_delete);
    assert_eq!(status.applied_in_branches.len(), 1);
    assert_eq!(status.applied_in_branches[0].branch, "dev");
    assert!(!status.applied_in_branches[0].branch_exists);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn branches_apply_the_shared_catalog_independently() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.branch_create("dev", "main", None)
        .expect("create should succeed");

    ws.migration_apply("001_init.sql")
        .expect("apply in main should succeed");
    let err = ws
        .migration_delete("001_init.sql")
        .expect_err("delete should conflict");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    ws.branch_switch("dev").expect("switch should succeed");
    ws.migration_apply("001_init.sql")
        .expect("dev applies the same file independently");

    let status = ws
        .migration_status("001_init.sql")
        .expect("status should succeed");
    let mut appliers: Vec<&str> = status
        .applied_in_branches
        .iter()
        .map(|entry| entry.branch.as_str())
        .collect();
    appliers.sort_unstable();
    assert_eq!(appliers, vec!["dev", "main"]);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn apply_all_halts_at_first_failure() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("ok", "CREATE TABLE a(id INTEGER);")
        .expect("migration 001 should create");
    ws.migration_create("broken", "CREATE TABLE b(;")
        .expect("migration 002 should create");
    ws.migration_create("never", "CREATE TABLE c(id INTEGER);")
        .expect("migration 003 should create");

    let report = ws.migration_apply_all().expect("apply-all should report");
    assert_eq!(report.len(), 2, "003 must never be attempted");
    assert_eq!(report[0].filename, "001_ok.sql");
    assert!(report[0].success);
    assert_eq!(report[1].filename, "002_broken.sql");
    assert!(!report[1].success);
    assert!(report[1].error.is_some());

    let applied: Vec<String> = ws
        .migration_list()
        .expect("listing should succeed")
        .into_iter()
        .filter(|entry| entry.applied)
        .map(|entry| entry.filename)
        .collect();
    assert_eq!(applied, vec!["001_ok.sql".to_string()]);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn snapshots_restore_only_into_their_owner() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.migration_apply("001_init.sql")
        .expect("apply should succeed");
    {
        let main = branch_conn(&root, "main.db");
        main.execute_batch("INSERT INTO t VALUES (1);")
            .expect("seed insert should succeed");
    }

    let snapshot = ws
        .snapshot_create("before-noise", None)
        .expect("snapshot should create");
    assert_eq!(snapshot.branch, "main");
    assert!(snapshot.file_exists);

    {
        let main = branch_conn(&root, "main.db");
        main.execute_batch("INSERT INTO t VALUES (2), (3);")
            .expect("noise insert should succeed");
    }

    ws.branch_create("dev", "main", None)
        .expect("create should succeed");
    ws.branch_switch("dev").expect("switch should succeed");
    let err = ws
        .snapshot_restore(snapshot.id)
        .expect_err("cross-branch restore must fail");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    ws.branch_switch("main").expect("switch should succeed");
    ws.snapshot_restore(snapshot.id)
        .expect("same-branch restore should succeed");

    let main = branch_conn(&root, "main.db");
    assert_eq!(
        row_count(&main, "t"),
        1,
        "restore returns table contents to capture time"
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn snapshot_reports_missing_bytes_and_refuses_restore() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    let snapshot = ws
        .snapshot_create("volatile", None)
        .expect("snapshot should create");
    std::fs::remove_file(root.join("snapshots").join(&snapshot.file_name))
        .expect("snapshot bytes should remove");

    let fetched = ws.snapshot_get(snapshot.id).expect("get should succeed");
    assert!(!fetched.file_exists, "drift must be visible");

    let err = ws
        .snapshot_restore(snapshot.id)
        .expect_err("restore without bytes must fail");
    assert!(matches!(err, WorkspaceError::NotFound(_)), "got: {err}");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn snapshot_delete_is_metadata_only_and_owner_scoped() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    let snapshot = ws
        .snapshot_create("keep-bytes", None)
        .expect("snapshot should create");
    ws.branch_create("dev", "main", None)
        .expect("create should succeed");
    ws.branch_switch("dev").expect("switch should succeed");

    let err = ws
        .snapshot_delete(snapshot.id)
        .expect_err("other branch's snapshot must not delete");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    ws.branch_switch("main").expect("switch should succeed");
    ws.snapshot_delete(snapshot.id)
        .expect("own snapshot should delete");
    assert!(
        root.join("snapshots").join(&snapshot.file_name).exists(),
        "bytes stay on disk until purge"
    );
    let err = ws
        .snapshot_get(snapshot.id)
        .expect_err("metadata row should be gone");
    assert!(matches!(err, WorkspaceError::NotFound(_)), "got: {err}");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn switch_to_missing_branch_leaves_pointer_alone() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    let err = ws
        .branch_switch("ghost")
        .expect_err("missing branch should fail");
    assert!(matches!(err, WorkspaceError::NotFound(_)), "got: {err}");
    assert_eq!(ws.current_branch().expect("pointer should read"), "main");

    // Switching to the current branch is a no-op, not an error.
    let outcome = ws.branch_switch("main").expect("no-op switch should succeed");
    assert_eq!(outcome.previous, "main");
    assert_eq!(outcome.current, "main");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn delete_refuses_main_and_current_and_keeps_the_file() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    let err = ws.branch_delete("main").expect_err("main must not delete");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    ws.branch_create("dev", "main", None)
        .expect("create should succeed");
    ws.branch_switch("dev").expect("switch should succeed");
    let err = ws
        .branch_delete("dev")
        .expect_err("current branch must not delete");
    assert!(matches!(err, WorkspaceError::Conflict(_)), "got: {err}");

    ws.branch_switch("main").expect("switch should succeed");
    ws.branch_delete("dev").expect("delete should succeed");
    assert!(
        root.join("dev.db").exists(),
        "backing file is retained for safety"
    );

    // purge is the explicit GC boundary for those bytes.
    let report = ws.purge().expect("purge should succeed");
    assert_eq!(report.removed_backing_files, vec!["dev.db".to_string()]);
    assert!(!root.join("dev.db").exists());
    assert!(root.join("main.db").exists());

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn promote_replaces_target_state_and_can_snapshot_first() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.migration_apply("001_init.sql")
        .expect("apply should succeed");
    ws.branch_create("dev", "main", None)
        .expect("create should succeed");
    {
        let dev = branch_conn(&root, "dev.db");
        dev.execute_batch("INSERT INTO t VALUES (1), (2), (3);")
            .expect("dev insert should succeed");
    }

    let snapshots_before = ws.snapshot_list().expect("listing should succeed").len();
    let outcome = ws
        .branch_promote("dev", "main", true)
        .expect("promote should succeed");
    let snapshot_id = outcome.snapshot_id.expect("pre-promote snapshot expected");

    let main = branch_conn(&root, "main.db");
    assert_eq!(row_count(&main, "t"), 3, "main now mirrors dev");

    let snapshots_after = ws.snapshot_list().expect("listing should succeed");
    assert_eq!(snapshots_after.len(), snapshots_before + 1);
    let pre_promote = ws.snapshot_get(snapshot_id).expect("get should succeed");
    assert_eq!(pre_promote.branch, "main");
    assert_eq!(pre_promote.name, "pre-promote");

    let err = ws
        .branch_promote("main", "main", true)
        .expect_err("self-promote must fail");
    assert!(matches!(err, WorkspaceError::InvalidArgument(_)), "got: {err}");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn timeline_records_lineage_on_both_sides() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.branch_create("dev", "main", None)
        .expect("create should succeed");

    let main_events = ws
        .timeline_query(Some("main"), 50, 0, false)
        .expect("query should succeed");
    assert!(
        main_events
            .events
            .iter()
            .any(|event| event.kind == "branch.forked"),
        "base branch records the fork"
    );

    let dev_events = ws
        .timeline_query(Some("dev"), 50, 0, false)
        .expect("query should succeed");
    assert!(
        dev_events
            .events
            .iter()
            .any(|event| event.kind == "branch.created"),
        "new branch records its origin"
    );
    assert!(
        dev_events
            .events
            .iter()
            .any(|event| event.kind == "snapshot.created"),
        "creation snapshot is on the new branch's timeline"
    );

    ws.branch_promote("dev", "main", false)
        .expect("promote should succeed");
    let dev_events = ws
        .timeline_query(Some("dev"), 50, 0, false)
        .expect("query should succeed");
    assert!(dev_events
        .events
        .iter()
        .any(|event| event.kind == "branch.promoted_to"));
    let main_events = ws
        .timeline_query(Some("main"), 50, 0, false)
        .expect("query should succeed");
    assert!(main_events
        .events
        .iter()
        .any(|event| event.kind == "branch.promoted_from"));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn timeline_defaults_to_current_branch_and_clears_per_branch() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.branch_create("dev", "main", None)
        .expect("create should succeed");
    ws.branch_switch("dev").expect("switch should succeed");

    let scoped = ws
        .timeline_query(None, 50, 0, false)
        .expect("query should succeed");
    assert!(scoped.events.iter().all(|event| event.branch == "dev"));

    let all = ws
        .timeline_query(None, 50, 0, true)
        .expect("query should succeed");
    assert!(all.total > scoped.total, "all-branches view sees main too");

    let err = ws
        .timeline_query(Some("ghost"), 50, 0, false)
        .expect_err("missing branch should fail");
    assert!(matches!(err, WorkspaceError::NotFound(_)), "got: {err}");

    let stats = ws.timeline_stats(None).expect("stats should succeed");
    assert_eq!(stats.branch, "dev");
    assert!(stats
        .by_kind
        .iter()
        .any(|entry| entry.kind == "branch.created"));

    let cleared = ws.timeline_clear(None).expect("clear should succeed");
    assert!(cleared > 0);
    let after = ws
        .timeline_query(None, 50, 0, false)
        .expect("query should succeed");
    assert_eq!(after.total, 0);
    let main_total = ws
        .timeline_query(Some("main"), 50, 0, false)
        .expect("query should succeed")
        .total;
    assert!(main_total > 0, "clear never crosses branches");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn migration_list_reports_checksums_and_branch_status() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.migration_create("more", "CREATE TABLE u(id INTEGER);")
        .expect("migration create should succeed");
    ws.migration_apply("001_init.sql")
        .expect("apply should succeed");

    let listing = ws.migration_list().expect("listing should succeed");
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].filename, "001_init.sql");
    assert!(listing[0].applied);
    assert!(listing[0].applied_at.is_some());
    assert_eq!(listing[0].checksum.len(), 64);
    assert_eq!(listing[1].filename, "002_more.sql");
    assert!(!listing[1].applied);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn branch_stats_aggregate_all_three_layers() {
    let root = unique_root();
    let mut ws = open_workspace(&root);

    ws.migration_create("init", "CREATE TABLE t(id INTEGER);")
        .expect("migration create should succeed");
    ws.migration_apply("001_init.sql")
        .expect("apply should succeed");
    ws.snapshot_create("manual", None)
        .expect("snapshot should create");

    let stats = ws.branch_stats("main").expect("stats should succeed");
    assert_eq!(stats.branch.name, "main");
    assert_eq!(stats.table_count, 1);
    assert_eq!(stats.applied_migrations, 1);
    assert_eq!(stats.snapshots, 1);
    assert!(stats.events >= 2, "apply + snapshot events at least");
    assert!(stats.file_size_bytes > 0);

    let err = ws.branch_stats("ghost").expect_err("missing branch fails");
    assert!(matches!(err, WorkspaceError::NotFound(_)), "got: {err}");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn doctor_reports_interrupted_operations_and_drift() {
    let root = unique_root();
    {
        let ws = open_workspace(&root);
        assert!(ws.doctor().expect("doctor should run").is_healthy());
    }

    // Simulate a crash between marker write and metadata insert.
    let meta_conn =
        meta::open_meta(&root.join(".dbranch").join("meta.sqlite")).expect("meta should open");
    meta::insert_pending_op(
        &meta_conn,
        &meta::PendingOp {
            id: "stale-op".to_string(),
            kind: "branch.create".to_string(),
            branch: "dev".to_string(),
            detail: "copy main.db -> dev.db".to_string(),
            started_at: meta::now_utc_rfc3339(),
        },
    )
    .expect("marker should insert");
    drop(meta_conn);

    let ws = open_workspace(&root);
    let report = ws.doctor().expect("doctor should run");
    assert!(!report.is_healthy());
    assert_eq!(report.pending_operations.len(), 1);
    assert_eq!(report.pending_operations[0].id, "stale-op");
    assert_eq!(report.pending_operations[0].branch, "dev");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn workspace_lock_refuses_a_second_process() {
    let root = unique_root();
    let ws = open_workspace(&root);

    let err = Workspace::open(&root).expect_err("second open should fail");
    assert!(matches!(err, WorkspaceError::Lock(_)), "got: {err}");
    drop(ws);

    Workspace::open(&root).expect("lock should be free after drop");

    let _ = std::fs::remove_dir_all(root);
}
