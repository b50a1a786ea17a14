use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};

use beanckup_core::manifest;
use beanckup_types::{EpisodeStatus, Plan};

use crate::format::format_bytes;

pub fn status_label(status: EpisodeStatus) -> &'static str {
    match status {
        EpisodeStatus::Pending => "pending",
        EpisodeStatus::InProgress => "in progress",
        EpisodeStatus::Completed => "delivered",
        EpisodeStatus::ExceededLimit => "deferred (over size cap)",
    }
}

/// The per-episode delivery overview shown before and between rounds.
pub fn print_delivery_progress(plan: &Plan, workspace_name: &str) {
    println!("\n=== Delivery progress (session S{:02}) ===", plan.session_id);
    println!("Planned delivery size: {}", format_bytes(plan.total_new_size));

    if plan.episodes.is_empty() {
        println!("No packages planned.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Package", "Size", "Files", "Status"]);

    for episode in &plan.episodes {
        let mut label = format!(
            "{workspace_name}-S{:02}E{:02}",
            plan.session_id, episode.id
        );
        if manifest::will_split(plan.package_size_limit_mb, episode.total_size) {
            label.push_str(" (multi-volume)");
        }
        table.add_row(vec![
            label,
            format_bytes(episode.total_size),
            episode.files.len().to_string(),
            status_label(episode.status).to_string(),
        ]);
    }
    println!("{table}");

    let delivered = plan.completed_size();
    println!("Delivered so far: {}", format_bytes(delivered));
}
