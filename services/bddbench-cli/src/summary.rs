//! Human-readable run summaries on stdout.

use bddbench_engine::{CleanupSummary, ScenarioOutcome};

pub fn print_outcome(command: &str, outcome: &ScenarioOutcome) {
    let stats = &outcome.stats;
    println!("\n✅ {command} complete!");
    println!("  Run id: {}", outcome.run_id);
    println!("  Operations: {} ({} failed)", stats.count, stats.error_count);
    println!("  Error rate: {:.2}%", stats.error_rate * 100.0);
    println!("  Wall clock: {:.2}s", stats.wall_clock_secs);
    if let Some(latency) = stats.latency {
        println!(
            "  Latency p50/p95/p99: {:.1}/{:.1}/{:.1} ms",
            latency.p50 * 1_000.0,
            latency.p95 * 1_000.0,
            latency.p99 * 1_000.0
        );
    }
    if stats.total_points > 0 {
        println!("  Points: {}", stats.total_points);
        println!("  Throughput: {:.0} points/sec", stats.throughput.points_per_s);
    } else if stats.total_rows > 0 {
        println!("  Rows: {}", stats.total_rows);
        println!("  Throughput: {:.0} rows/sec", stats.throughput.rows_per_s);
    } else {
        println!("  Throughput: {:.1} ops/sec", stats.throughput.ops_per_s);
    }
    if let Some(context) = &outcome.context {
        println!("  Context: {} in {}", context.measurement, context.target.identity());
    }
    println!("  Report: {}", outcome.published.report_path.display());
    println!("  KPI log: {}", outcome.published.kpi_path.display());
    if outcome.published.exported {
        println!("  KPI exported to the results database");
    }
}

pub fn print_cleanup(summary: &CleanupSummary, dry_run: bool) {
    if dry_run {
        println!("\nDry run, nothing deleted. Planned:");
    } else {
        println!("\n✅ cleanup complete!");
    }
    for line in &summary.planned {
        println!("  - {line}");
    }
    if summary.planned.is_empty() {
        println!("  Nothing recorded for this target");
    }
    if !dry_run {
        println!("  Deleted: {}", summary.deleted);
        println!("  Failed: {}", summary.failed);
    } else {
        println!("  Re-run with --yes to delete");
    }
}
