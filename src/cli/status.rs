// src/cli/status.rs — Plain-text rendering of runtime state

use crate::runtime::events::DispatchReport;
use crate::runtime::types::{PendingUpdate, PluginDescriptor, PluginView};
use crate::runtime::watcher::ScanReport;

/// Descriptor table as shown by `plughost list`.
pub fn format_descriptors(descriptors: &[PluginDescriptor]) -> String {
    if descriptors.is_empty() {
        return "No plugins recorded.".into();
    }
    let mut out = format!(
        "{:<20} {:<10} {:<12} {:<24} {}\n",
        "NAME", "VERSION", "STATE", "ARTIFACT", "LAST ERROR"
    );
    for d in descriptors {
        out.push_str(&format!(
            "{:<20} {:<10} {:<12} {:<24} {}\n",
            d.name,
            if d.version.is_empty() { "-" } else { d.version.as_str() },
            d.display_state(),
            d.artifact_file_name,
            d.last_error.as_deref().unwrap_or("-")
        ));
    }
    out.truncate(out.trim_end().len());
    out
}

/// Live plugins as shown by the console `list` command.
pub fn format_views(views: &[PluginView]) -> String {
    if views.is_empty() {
        return "No plugins loaded.".into();
    }
    views
        .iter()
        .map(|v| {
            format!(
                "{} v{} [{}] {} (scope {}, {})",
                v.info.name,
                v.info.version,
                v.state,
                v.artifact_file_name,
                v.scope_id,
                &v.content_hash[..v.content_hash.len().min(12)]
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_scan_report(report: &ScanReport) -> String {
    let mut out = format!("scan: {}", report.summary());
    let sections: [(&str, &Vec<String>); 7] = [
        ("loaded", &report.loaded),
        ("applied", &report.applied),
        ("deferred", &report.deferred),
        ("cancelled", &report.cancelled),
        ("failed", &report.failed),
        ("removed", &report.removed),
        ("skipped", &report.skipped),
    ];
    for (label, names) in sections {
        if !names.is_empty() {
            out.push_str(&format!("\n  {}: {}", label, names.join(", ")));
        }
    }
    out
}

pub fn format_pending(updates: &[PendingUpdate]) -> String {
    if updates.is_empty() {
        return "No pending updates.".into();
    }
    updates
        .iter()
        .map(|u| {
            format!(
                "{} -> {} (detected {})",
                u.plugin_name,
                &u.new_hash[..u.new_hash.len().min(12)],
                u.detected_at.format("%Y-%m-%d %H:%M:%S")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_dispatch(report: &DispatchReport) -> String {
    let mut out = format!(
        "delivered {}, skipped {}, failed {}, timed out {}",
        report.delivered,
        report.skipped,
        report.failed.len(),
        report.timed_out.len()
    );
    for (plugin, error) in &report.failed {
        out.push_str(&format!("\n  {}: {}", plugin, error));
    }
    for plugin in &report.timed_out {
        out.push_str(&format!("\n  {}: timed out", plugin));
    }
    out
}
