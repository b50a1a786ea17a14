use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

use beanckup_core::config::{self, WorkspaceConfig};
use beanckup_core::deliver::{DeliveryParams, DeliverySession};
use beanckup_core::error::Result;
use beanckup_core::history::{self, HistoricalState};
use beanckup_core::index::{self, ChangeSummary};
use beanckup_core::plan::create_plan;
use beanckup_core::session;
use beanckup_core::workspace::Workspace;
use beanckup_types::Plan;

use crate::format::format_bytes;
use crate::progress::ProgressLine;
use crate::prompt;
use crate::table::print_delivery_progress;

const LAST_WORKSPACE_FILE: &str = ".beanckup_last_workspace";

/// The scan-and-deliver flow: pick a workspace, resume or rescan, plan, and
/// drive the delivery loop.
pub fn run(preset_workspace: Option<&str>) -> Result<()> {
    let ws_path = match preset_workspace {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.is_dir() {
                return Err(beanckup_core::error::BeanckupError::Config(format!(
                    "workspace does not exist: {}",
                    path.display()
                )));
            }
            path
        }
        None => choose_workspace()?,
    };

    let workspace = Workspace::new(ws_path);
    let meta_dir = workspace.ensure_meta_dir()?;
    println!("\nWorkspace: {} ({})", workspace.name(), workspace.root().display());

    let defaults = config::load_config(&meta_dir)?.unwrap_or_default();

    // A resumable plan takes precedence over a fresh scan.
    if let Some(plan) = session::find_resumable_plan(&meta_dir)? {
        println!(
            "\n⚠ Unfinished delivery found: session S{:02}, {} package(s) remaining.",
            plan.session_id,
            plan.count_unfinished()
        );
        print_delivery_progress(&plan, workspace.name());
        println!("\n  1. Continue the unfinished delivery");
        println!("  2. Ignore it and start a new scan");
        if let Some(0) = prompt::ask_choice("Choose", 2)? {
            let params = ask_resume_params(&defaults)?;
            return run_delivery_loop(&workspace, plan, params, &meta_dir, &defaults);
        }
        println!("Ignoring the old plan, scanning afresh...");
    }

    let state = history::load_historical_state(&meta_dir)?;
    if state.is_empty() {
        println!("First scan: a new backup history will be created.");
    } else {
        println!("History found, latest session: S{:02}.", state.max_session_id());
    }

    println!("\n=== Scanning workspace ===");
    let nodes = scan_with_progress(&workspace, &state)?;

    let summary = index::summarize_changes(&nodes, &state);
    print_summary(&summary);
    if !summary.has_changes() {
        println!("No incremental changes, nothing to deliver.");
        return Ok(());
    }

    if !prompt::confirm("\nStart delivery?") {
        println!("Delivery cancelled.");
        return Ok(());
    }

    let (params, package_cap_mb) = ask_delivery_params(summary.new_size, &defaults)?;
    remember_config(&meta_dir, &params, package_cap_mb, &defaults);

    let plan = create_plan(
        state.max_session_id() + 1,
        nodes,
        package_cap_mb,
        Utc::now(),
    );
    if plan.episodes.is_empty() {
        println!("Nothing was scheduled for delivery.");
        return Ok(());
    }

    run_delivery_loop(&workspace, plan, params, &meta_dir, &defaults)
}

fn scan_with_progress(workspace: &Workspace, state: &HistoricalState) -> Result<Vec<beanckup_types::FileNode>> {
    let mut line = ProgressLine::new();
    let nodes = index::scan_workspace(workspace, state, |p| {
        let percent = if p.total == 0 {
            100
        } else {
            p.processed * 100 / p.total
        };
        line.update(&format!(
            "Scanning: {}/{} files ({percent}%) - {}",
            p.processed, p.total, p.current
        ));
    });
    line.finish();
    nodes
}

fn print_summary(summary: &ChangeSummary) {
    println!("\n=== Scan results ===");
    println!("New files:           {}", summary.new_files);
    println!("Moved/renamed files: {}", summary.moved_files);
    println!("Deleted files:       {}", summary.deleted_files);
    println!("New content size:    {}", format_bytes(summary.new_size));
}

fn run_delivery_loop(
    workspace: &Workspace,
    plan: Plan,
    params: DeliveryParams,
    meta_dir: &std::path::Path,
    defaults: &WorkspaceConfig,
) -> Result<()> {
    let mut delivery = DeliverySession::new(workspace, plan, params)?;
    delivery.recover_interrupted()?;

    loop {
        delivery.reassess();
        delivery.persist()?;
        print_delivery_progress(delivery.plan(), workspace.name());

        let pending = delivery.pending_episode_ids();
        if pending.is_empty() {
            if !delivery.is_completed() {
                println!("\nNothing fits under the current total-size cap.");
            }
        } else {
            if !prompt::confirm(&format!("\nDeliver {} package(s) now?", pending.len())) {
                println!("Delivery paused; rerun to continue.");
                return Ok(());
            }

            let total = delivery.plan().episodes.len();
            for id in pending {
                println!("\n--- Delivering E{id:02} ---");
                let mut line = ProgressLine::new();
                let result = delivery.deliver_episode(id, &mut |p| {
                    let file = p.current_file.as_deref().unwrap_or("");
                    line.update(&format!(
                        "  > packaging [{id}/{total}]: {}% {file}",
                        p.percentage
                    ));
                });
                line.finish();

                match result {
                    Ok(package) => println!("✓ Package {package} delivered."),
                    Err(e) => {
                        println!("⚠ Episode E{id:02} failed: {e}");
                        if !prompt::confirm("Continue with the next package?") {
                            return Ok(());
                        }
                    }
                }
            }
        }

        if delivery.finish()? {
            println!("\n★ All packages delivered; the plan status file was cleaned up.");
            return Ok(());
        }

        println!("\nSome packages remain undelivered.");
        println!("  1. Exit for now (resume later)");
        println!("  2. Re-configure and continue");
        match prompt::ask_choice("Choose", 2)? {
            Some(1) => {
                let params = ask_resume_params(defaults)?;
                remember_config(meta_dir, &params, delivery.plan().package_size_limit_mb, defaults);
                delivery.set_params(params);
            }
            _ => {
                println!("Paused. Rerun scan-and-deliver to resume.");
                return Ok(());
            }
        }
    }
}

fn ask_delivery_params(
    total_new_size: u64,
    defaults: &WorkspaceConfig,
) -> Result<(DeliveryParams, u32)> {
    println!("\n=== Delivery parameters ===");
    let default_delivery = if defaults.delivery_path.is_empty() {
        "./delivery"
    } else {
        &defaults.delivery_path
    };
    let delivery_dir = prompt::ask_dir_with_default("Delivery directory", default_delivery)?;

    println!("New content size: {}", format_bytes(total_new_size));
    let package_cap_mb = prompt::ask_u32(
        "Single package size cap in MB, 0 = no split",
        defaults.package_size_limit_mb,
    )?;
    let total_cap_mb = prompt::ask_u32(
        "Total size cap for this run in MB, 0 = unlimited",
        defaults.total_size_limit_mb,
    )?;
    let compression_level = prompt::ask_compression_level(defaults.compression_level)?;
    let password = prompt::ask_password("Encryption password (empty for none)")?;

    Ok((
        DeliveryParams {
            delivery_dir,
            total_size_limit_mb: total_cap_mb,
            compression_level,
            password,
        },
        package_cap_mb,
    ))
}

/// Resume keeps the plan's package-size cap; everything else is re-asked.
fn ask_resume_params(defaults: &WorkspaceConfig) -> Result<DeliveryParams> {
    println!("\n=== Delivery parameters ===");
    let default_delivery = if defaults.delivery_path.is_empty() {
        "./delivery"
    } else {
        &defaults.delivery_path
    };
    let delivery_dir = prompt::ask_dir_with_default("Delivery directory", default_delivery)?;
    let total_cap_mb = prompt::ask_u32(
        "Total size cap for this run in MB, 0 = unlimited",
        defaults.total_size_limit_mb,
    )?;
    let compression_level = prompt::ask_compression_level(defaults.compression_level)?;
    let password = prompt::ask_password("Encryption password (empty for none)")?;

    Ok(DeliveryParams {
        delivery_dir,
        total_size_limit_mb: total_cap_mb,
        compression_level,
        password,
    })
}

fn remember_config(
    meta_dir: &std::path::Path,
    params: &DeliveryParams,
    package_cap_mb: u32,
    defaults: &WorkspaceConfig,
) {
    let config = WorkspaceConfig {
        delivery_path: params.delivery_dir.display().to_string(),
        restore_path: defaults.restore_path.clone(),
        package_size_limit_mb: package_cap_mb,
        total_size_limit_mb: params.total_size_limit_mb,
        compression_level: params.compression_level,
        password: String::new(),
    };
    if let Err(e) = config::save_config(meta_dir, &config) {
        warn!(error = %e, "could not save workspace config");
    }
}

/// Ask for the workspace, offering the previous choice first. The memory
/// lives in a dotfile next to the executable.
fn choose_workspace() -> Result<PathBuf> {
    if let Some(last) = read_last_workspace() {
        if last.is_dir()
            && prompt::confirm(&format!("Use the previous workspace '{}'?", last.display()))
        {
            return Ok(last);
        }
    }

    let path = prompt::ask_existing_dir("Enter (or drag in) the workspace directory")?;
    write_last_workspace(&path);
    Ok(path)
}

fn last_workspace_file() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(LAST_WORKSPACE_FILE))
}

fn read_last_workspace() -> Option<PathBuf> {
    let file = last_workspace_file()?;
    let data = std::fs::read_to_string(file).ok()?;
    let trimmed = data.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn write_last_workspace(path: &std::path::Path) {
    if let Some(file) = last_workspace_file() {
        if let Err(e) = std::fs::write(&file, path.display().to_string()) {
            warn!(error = %e, "could not remember workspace choice");
        }
    }
}
