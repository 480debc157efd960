use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meta::{self, EventKindCount, EventRow};
use crate::workspace::WorkspaceError;

/// One validated payload variant per event kind. The kind string is
/// embedded in the JSON tag, so a stored payload round-trips on its
/// own and an unknown blob can never masquerade as a known kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "branch.created")]
    BranchCreated { from: String },
    #[serde(rename = "branch.forked")]
    BranchForked { name: String },
    #[serde(rename = "branch.switched")]
    BranchSwitched { from: String },
    #[serde(rename = "branch.deleted")]
    BranchDeleted { name: String },
    #[serde(rename = "branch.promoted_to")]
    BranchPromotedTo { target: String },
    #[serde(rename = "branch.promoted_from")]
    BranchPromotedFrom {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot_id: Option<i64>,
    },
    #[serde(rename = "migration.created")]
    MigrationCreated { filename: String },
    #[serde(rename = "migration.applied")]
    MigrationApplied { filename: String },
    #[serde(rename = "migration.deleted")]
    MigrationDeleted { filename: String },
    #[serde(rename = "snapshot.created")]
    SnapshotCreated { id: i64, name: String },
    #[serde(rename = "snapshot.restored")]
    SnapshotRestored { id: i64, name: String },
    #[serde(rename = "snapshot.deleted")]
    SnapshotDeleted { id: i64 },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::BranchCreated { .. } => "branch.created",
            EventPayload::BranchForked { .. } => "branch.forked",
            EventPayload::BranchSwitched { .. } => "branch.switched",
            EventPayload::BranchDeleted { .. } => "branch.deleted",
            EventPayload::BranchPromotedTo { .. } => "branch.promoted_to",
            EventPayload::BranchPromotedFrom { .. } => "branch.promoted_from",
            EventPayload::MigrationCreated { .. } => "migration.created",
            EventPayload::MigrationApplied { .. } => "migration.applied",
            EventPayload::MigrationDeleted { .. } => "migration.deleted",
            EventPayload::SnapshotCreated { .. } => "snapshot.created",
            EventPayload::SnapshotRestored { .. } => "snapshot.restored",
            EventPayload::SnapshotDeleted { .. } => "snapshot.deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventView {
    pub id: i64,
    pub branch: String,
    pub kind: String,
    pub payload: Value,
    pub created_at: String,
}

impl From<EventRow> for EventView {
    fn from(row: EventRow) -> Self {
        // Rows written by older versions may hold payloads the current
        // enum no longer parses; surface them verbatim.
        let payload = serde_json::from_str(&row.payload).unwrap_or(Value::Null);
        Self {
            id: row.id,
            branch: row.branch,
            kind: row.kind,
            payload,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimelinePage {
    pub events: Vec<EventView>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimelineStats {
    pub branch: String,
    pub by_kind: Vec<KindCount>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KindCount {
    pub kind: String,
    pub count: i64,
}

impl From<EventKindCount> for KindCount {
    fn from(value: EventKindCount) -> Self {
        Self {
            kind: value.kind,
            count: value.count,
        }
    }
}

/// Appends one event tagged to the branch it semantically belongs to.
pub fn record(meta: &Connection, branch: &str, payload: &EventPayload) -> Result<(), WorkspaceError> {
    let json = serde_json::to_string(payload).map_err(|err| {
        WorkspaceError::InvalidArgument(format!("event payload failed to serialize: {err}"))
    })?;
    meta::insert_event(
        meta,
        branch,
        payload.kind(),
        &json,
        &meta::now_utc_rfc3339(),
    )?;
    Ok(())
}

pub fn query(
    meta: &Connection,
    branch: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<TimelinePage, WorkspaceError> {
    let limit = limit.max(0);
    let offset = offset.max(0);
    let total = meta::count_events(meta, branch)?;
    let events = meta::query_events(meta, branch, limit, offset)?
        .into_iter()
        .map(EventView::from)
        .collect();
    Ok(TimelinePage { events, total })
}

pub fn stats(meta: &Connection, branch: &str) -> Result<TimelineStats, WorkspaceError> {
    let by_kind = meta::event_stats(meta, branch)?
        .into_iter()
        .map(KindCount::from)
        .collect();
    Ok(TimelineStats {
        branch: branch.to_string(),
        by_kind,
    })
}

/// Deletes only the given branch's events.
pub fn clear(meta: &Connection, branch: &str) -> Result<i64, WorkspaceError> {
    Ok(meta::clear_events(meta, branch)?)
}
