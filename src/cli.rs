use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, CommandFactory, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> clap::Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "dbranch")]
#[command(bin_name = "dbranch")]
#[command(version)]
#[command(about = "Git-like branches, migrations, and snapshots for single-file SQLite projects")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'C',
        long = "root",
        env = "DBRANCH_ROOT",
        default_value = ".",
        help = "Project root holding branch database files."
    )]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Initialize the workspace (creates main and the metadata store).")]
    Init,
    #[command(about = "Branch lifecycle: list, create, switch, delete, promote.")]
    Branch(BranchArgs),
    #[command(about = "Global migration catalog with per-branch application tracking.")]
    Migration(MigrationArgs),
    #[command(about = "Per-branch snapshots: capture and same-branch restore.")]
    Snapshot(SnapshotArgs),
    #[command(about = "Branch-tagged audit timeline.")]
    Timeline(TimelineArgs),
    #[command(about = "Report interrupted operations and file/metadata drift.")]
    Doctor(JsonArgs),
    #[command(about = "Delete orphaned backing and snapshot files.")]
    Purge,
    #[command(about = "Generate shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(help = "Shell name (bash, zsh, fish). Auto-detected if omitted.")]
    pub shell: Option<String>,
}

#[derive(Debug, Args)]
pub struct BranchArgs {
    #[command(subcommand)]
    pub command: BranchSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum BranchSubcommands {
    #[command(about = "List branches, main first, current marked.", alias = "ls")]
    List(JsonArgs),
    #[command(about = "Show the current branch.")]
    Current(JsonArgs),
    #[command(about = "Create a branch as a copy of an existing base.")]
    Create(BranchCreateArgs),
    #[command(about = "Switch the current-branch pointer.")]
    Switch(BranchNameArgs),
    #[command(about = "Delete a branch (metadata only; the file stays).")]
    Delete(BranchNameArgs),
    #[command(about = "Replace a target branch's state with a source branch's.")]
    Promote(BranchPromoteArgs),
    #[command(about = "Aggregate counts for one branch.")]
    Stats(BranchStatsArgs),
}

#[derive(Debug, Args)]
pub struct BranchCreateArgs {
    #[arg(help = "New branch name (letters, digits, '-', '_', '/').")]
    pub name: String,

    #[arg(short = 'b', long, help = "Base branch to copy from. Required.")]
    pub base: String,

    #[arg(short = 'd', long = "desc", help = "Optional description.")]
    pub desc: Option<String>,
}

#[derive(Debug, Args)]
pub struct BranchNameArgs {
    #[arg(help = "Branch name.")]
    pub name: String,
}

#[derive(Debug, Args)]
pub struct BranchPromoteArgs {
    #[arg(help = "Source branch.")]
    pub source: String,

    #[arg(help = "Target branch to overwrite.")]
    pub target: String,

    #[arg(
        long = "no-snapshot",
        help = "Skip the pre-promote snapshot of the target."
    )]
    pub no_snapshot: bool,
}

#[derive(Debug, Args)]
pub struct BranchStatsArgs {
    #[arg(help = "Branch name.")]
    pub name: String,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MigrationArgs {
    #[command(subcommand)]
    pub command: MigrationSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum MigrationSubcommands {
    #[command(about = "List the catalog with the current branch's status.", alias = "ls")]
    List(JsonArgs),
    #[command(about = "Add a migration to the global catalog.")]
    Create(MigrationCreateArgs),
    #[command(about = "Apply one migration to the current branch.")]
    Apply(MigrationFileArgs),
    #[command(about = "Apply every pending migration, stopping at the first failure.")]
    ApplyAll(JsonArgs),
    #[command(about = "Delete a never-applied migration from the catalog.")]
    Delete(MigrationFileArgs),
    #[command(about = "Show which branches applied a migration.")]
    Status(MigrationStatusArgs),
}

#[derive(Debug, Args)]
pub struct MigrationCreateArgs {
    #[arg(help = "Migration name (letters, digits, '-', '_').")]
    pub name: String,

    #[arg(short = 's', long, help = "SQL text for the migration.")]
    pub sql: Option<String>,

    #[arg(short = 'f', long = "file", help = "Read the SQL from a file instead.")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MigrationFileArgs {
    #[arg(help = "Catalog filename, e.g. 001_init.sql.")]
    pub filename: String,
}

#[derive(Debug, Args)]
pub struct MigrationStatusArgs {
    #[arg(help = "Catalog filename, e.g. 001_init.sql.")]
    pub filename: String,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotSubcommands {
    #[command(about = "List the current branch's snapshots.", alias = "ls")]
    List(JsonArgs),
    #[command(about = "Capture the current branch's backing file.")]
    Create(SnapshotCreateArgs),
    #[command(about = "Restore a snapshot into its owning branch.")]
    Restore(SnapshotIdArgs),
    #[command(about = "Delete a snapshot's metadata (bytes stay until purge).")]
    Delete(SnapshotIdArgs),
    #[command(about = "Show one snapshot.")]
    Show(SnapshotShowArgs),
}

#[derive(Debug, Args)]
pub struct SnapshotCreateArgs {
    #[arg(help = "Snapshot name.")]
    pub name: String,

    #[arg(short = 'd', long = "desc", help = "Optional description.")]
    pub desc: Option<String>,
}

#[derive(Debug, Args)]
pub struct SnapshotIdArgs {
    #[arg(help = "Snapshot id.")]
    pub id: i64,
}

#[derive(Debug, Args)]
pub struct SnapshotShowArgs {
    #[arg(help = "Snapshot id.")]
    pub id: i64,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TimelineArgs {
    #[command(subcommand)]
    pub command: TimelineSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum TimelineSubcommands {
    #[command(about = "Query events, newest first.")]
    Show(TimelineShowArgs),
    #[command(about = "Event counts grouped by kind.")]
    Stats(TimelineBranchArgs),
    #[command(about = "Delete one branch's events.")]
    Clear(TimelineBranchArgs),
}

#[derive(Debug, Args)]
pub struct TimelineShowArgs {
    #[arg(short = 'b', long, help = "Branch to query (defaults to current).")]
    pub branch: Option<String>,

    #[arg(short = 'a', long = "all", help = "Query across every branch.")]
    pub all: bool,

    #[arg(short = 'n', long, default_value_t = 50, help = "Page size.")]
    pub limit: i64,

    #[arg(short = 'o', long, default_value_t = 0, help = "Page offset.")]
    pub offset: i64,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TimelineBranchArgs {
    #[arg(short = 'b', long, help = "Branch (defaults to current).")]
    pub branch: Option<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}
