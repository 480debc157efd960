mod branches;
mod cli;
mod completions;
mod dbfile;
mod layout;
mod locks;
mod meta;
mod migrations;
mod registry;
mod snapshots;
mod timeline;
mod workspace;

use clap::Parser;

use cli::{
    BranchSubcommands, Commands, MigrationSubcommands, SnapshotSubcommands, TimelineSubcommands,
};
use workspace::{Workspace, WorkspaceError};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn run() -> Result<(), WorkspaceError> {
    let cli = cli::Cli::parse();

    if let Commands::Completions(args) = &cli.command {
        let shell = match args.shell.as_deref() {
            Some(name) => completions::shell_from_name(name).ok_or_else(|| {
                WorkspaceError::InvalidArgument(format!("unsupported shell '{name}'"))
            })?,
            None => completions::detect_current_shell().ok_or_else(|| {
                WorkspaceError::InvalidArgument(
                    "could not detect shell; pass one explicitly".to_string(),
                )
            })?,
        };
        completions::generate_completions(shell, &mut std::io::stdout());
        return Ok(());
    }

    let mut ws = Workspace::open(&cli.root)?;

    match cli.command {
        Commands::Completions(_) => unreachable!("handled above"),
        Commands::Init => {
            let report = ws.doctor()?;
            println!("workspace ready at {}", ws.root().display());
            if !report.is_healthy() {
                println!("warning: run `dbranch doctor` — interrupted operations or drift found");
            }
        }
        Commands::Doctor(args) => {
            let report = ws.doctor()?;
            if args.json {
                print_json(&report);
            } else if report.is_healthy() {
                println!("workspace healthy");
            } else {
                for op in &report.pending_operations {
                    println!(
                        "interrupted {} on '{}' since {}: {}",
                        op.kind, op.branch, op.started_at, op.detail
                    );
                }
                for branch in &report.branches_missing_backing_file {
                    println!("branch '{branch}' is missing its backing file");
                }
                for id in &report.snapshots_missing_file {
                    println!("snapshot {id} is missing its file");
                }
            }
        }
        Commands::Purge => {
            let report = ws.purge()?;
            let removed = report.removed_backing_files.len() + report.removed_snapshot_files.len();
            for name in &report.removed_backing_files {
                println!("removed {name}");
            }
            for name in &report.removed_snapshot_files {
                println!("removed snapshots/{name}");
            }
            println!("purged {removed} orphaned file(s)");
        }
        Commands::Branch(args) => run_branch(&mut ws, args.command)?,
        Commands::Migration(args) => run_migration(&mut ws, args.command)?,
        Commands::Snapshot(args) => run_snapshot(&mut ws, args.command)?,
        Commands::Timeline(args) => run_timeline(&ws, args.command)?,
    }
    Ok(())
}

fn run_branch(ws: &mut Workspace, command: BranchSubcommands) -> Result<(), WorkspaceError> {
    match command {
        BranchSubcommands::List(args) => {
            let listing = ws.branch_list()?;
            if args.json {
                print_json(&listing);
            } else {
                for branch in &listing.branches {
                    let marker = if branch.is_current { "*" } else { " " };
                    let parent = branch
                        .created_from
                        .as_deref()
                        .map(|base| format!(" (from {base})"))
                        .unwrap_or_default();
                    println!("{marker} {}{parent}", branch.name);
                }
            }
        }
        BranchSubcommands::Current(args) => {
            let branch = ws.branch_current()?;
            if args.json {
                print_json(&branch);
            } else {
                println!("{}", branch.name);
            }
        }
        BranchSubcommands::Create(args) => {
            let branch = ws.branch_create(&args.name, &args.base, args.desc.as_deref())?;
            println!("created branch '{}' from '{}'", branch.name, args.base);
        }
        BranchSubcommands::Switch(args) => {
            let outcome = ws.branch_switch(&args.name)?;
            println!("switched {} -> {}", outcome.previous, outcome.current);
        }
        BranchSubcommands::Delete(args) => {
            ws.branch_delete(&args.name)?;
            println!("deleted branch '{}' (backing file retained)", args.name);
        }
        BranchSubcommands::Promote(args) => {
            let outcome = ws.branch_promote(&args.source, &args.target, !args.no_snapshot)?;
            match outcome.snapshot_id {
                Some(id) => println!(
                    "promoted '{}' onto '{}' (pre-promote snapshot {id})",
                    outcome.source, outcome.target
                ),
                None => println!("promoted '{}' onto '{}'", outcome.source, outcome.target),
            }
        }
        BranchSubcommands::Stats(args) => {
            let stats = ws.branch_stats(&args.name)?;
            if args.json {
                print_json(&stats);
            } else {
                println!(
                    "{}: {} tables, {} migrations, {} snapshots, {} events, {} bytes",
                    stats.branch.name,
                    stats.table_count,
                    stats.applied_migrations,
                    stats.snapshots,
                    stats.events,
                    stats.file_size_bytes
                );
            }
        }
    }
    Ok(())
}

fn run_migration(ws: &mut Workspace, command: MigrationSubcommands) -> Result<(), WorkspaceError> {
    match command {
        MigrationSubcommands::List(args) => {
            let listing = ws.migration_list()?;
            if args.json {
                print_json(&listing);
            } else {
                for entry in &listing {
                    let status = match entry.applied_at.as_deref() {
                        Some(at) => format!("applied {at}"),
                        None => "pending".to_string(),
                    };
                    println!("{} [{status}]", entry.filename);
                }
            }
        }
        MigrationSubcommands::Create(args) => {
            let sql = match (args.sql, args.file) {
                (Some(sql), None) => sql,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                _ => {
                    return Err(WorkspaceError::InvalidArgument(
                        "pass exactly one of --sql or --file".to_string(),
                    ))
                }
            };
            let filename = ws.migration_create(&args.name, &sql)?;
            println!("created migration {filename}");
        }
        MigrationSubcommands::Apply(args) => {
            ws.migration_apply(&args.filename)?;
            println!("applied {}", args.filename);
        }
        MigrationSubcommands::ApplyAll(args) => {
            let report = ws.migration_apply_all()?;
            if args.json {
                print_json(&report);
            } else if report.is_empty() {
                println!("nothing pending");
            } else {
                for outcome in &report {
                    match &outcome.error {
                        None => println!("applied {}", outcome.filename),
                        Some(error) => println!("failed  {}: {error}", outcome.filename),
                    }
                }
            }
        }
        MigrationSubcommands::Delete(args) => {
            ws.migration_delete(&args.filename)?;
            println!("deleted {}", args.filename);
        }
        MigrationSubcommands::Status(args) => {
            let status = ws.migration_status(&args.filename)?;
            if args.json {
                print_json(&status);
            } else {
                if status.applied_in_branches.is_empty() {
                    println!("{}: never applied", status.filename);
                }
                for applier in &status.applied_in_branches {
                    let note = if applier.branch_exists {
                        ""
                    } else {
                        " (branch deleted)"
                    };
                    println!(
                        "{}: applied in '{}' at {}{note}",
                        status.filename, applier.branch, applier.applied_at
                    );
                }
                println!(
                    "deletable: {}",
                    if status.can_delete { "yes" } else { "no" }
                );
            }
        }
    }
    Ok(())
}

fn run_snapshot(ws: &mut Workspace, command: SnapshotSubcommands) -> Result<(), WorkspaceError> {
    match command {
        SnapshotSubcommands::List(args) => {
            let listing = ws.snapshot_list()?;
            if args.json {
                print_json(&listing);
            } else {
                for snapshot in &listing {
                    let drift = if snapshot.file_exists { "" } else { " [missing]" };
                    println!(
                        "{} {} ({} bytes, {}){drift}",
                        snapshot.id, snapshot.name, snapshot.size_bytes, snapshot.created_at
                    );
                }
            }
        }
        SnapshotSubcommands::Create(args) => {
            let snapshot = ws.snapshot_create(&args.name, args.desc.as_deref())?;
            println!("created snapshot {} '{}'", snapshot.id, snapshot.name);
        }
        SnapshotSubcommands::Restore(args) => {
            ws.snapshot_restore(args.id)?;
            println!("restored snapshot {}", args.id);
        }
        SnapshotSubcommands::Delete(args) => {
            ws.snapshot_delete(args.id)?;
            println!("deleted snapshot {} (bytes retained)", args.id);
        }
        SnapshotSubcommands::Show(args) => {
            let snapshot = ws.snapshot_get(args.id)?;
            if args.json {
                print_json(&snapshot);
            } else {
                println!(
                    "{} '{}' on '{}' ({} bytes, {}){}",
                    snapshot.id,
                    snapshot.name,
                    snapshot.branch,
                    snapshot.size_bytes,
                    snapshot.created_at,
                    if snapshot.file_exists { "" } else { " [missing]" }
                );
            }
        }
    }
    Ok(())
}

fn run_timeline(ws: &Workspace, command: TimelineSubcommands) -> Result<(), WorkspaceError> {
    match command {
        TimelineSubcommands::Show(args) => {
            let page = ws.timeline_query(args.branch.as_deref(), args.limit, args.offset, args.all)?;
            if args.json {
                print_json(&page);
            } else {
                for event in &page.events {
                    println!(
                        "{} [{}] {} {}",
                        event.created_at, event.branch, event.kind, event.payload
                    );
                }
                println!("{} of {} event(s)", page.events.len(), page.total);
            }
        }
        TimelineSubcommands::Stats(args) => {
            let stats = ws.timeline_stats(args.branch.as_deref())?;
            if args.json {
                print_json(&stats);
            } else {
                for entry in &stats.by_kind {
                    println!("{:>6}  {}", entry.count, entry.kind);
                }
            }
        }
        TimelineSubcommands::Clear(args) => {
            let cleared = ws.timeline_clear(args.branch.as_deref())?;
            println!("cleared {cleared} event(s)");
        }
    }
    Ok(())
}
