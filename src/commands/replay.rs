//! Replay command implementation with progress tracking
//!
//! Every file gets its own `Session`, so symbols replay independently and
//! in parallel unless `--sequential` is given.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use regime_signals::{load_csv, Config, ReplayReport, Session};
use std::path::{Path, PathBuf};
use tracing::{error, info};

fn replay_file(path: &Path, config: &Config) -> Result<ReplayReport> {
    let symbol = super::symbol_for(path, None)?;
    let candles = load_csv(path)?;
    let mut session = Session::new(config);
    Ok(session.replay(&symbol, &candles)?)
}

pub fn run(data: Vec<PathBuf>, config: Option<PathBuf>, sequential: bool) -> Result<()> {
    let config = super::load_config(config.as_deref())?;
    info!("Replaying {} series", data.len());

    println!("\n{}", "=".repeat(60));
    println!("REPLAY");
    println!("  Series:        {}", data.len());
    println!("  Warmup bars:   {}", config.replay.warmup_bars);
    println!("  Window bars:   {}", config.replay.window_bars);
    println!("  Mode:          {}", if sequential { "sequential" } else { "parallel" });
    println!("{}\n", "=".repeat(60));

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Replaying...");

    let step = |path: &PathBuf| {
        let report = replay_file(path, &config);
        pb.inc(1);
        (path.clone(), report)
    };

    let results: Vec<(PathBuf, Result<ReplayReport>)> = if sequential {
        data.iter().map(step).collect()
    } else {
        data.par_iter().map(step).collect()
    };

    pb.finish_with_message("done");

    let mut failures = 0;
    for (path, result) in results {
        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                failures += 1;
                error!("Replay of {} failed: {:#}", path.display(), e);
                println!("\n{}: FAILED ({:#})", path.display(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} replays failed", failures, data.len());
    }
    Ok(())
}

fn print_report(report: &ReplayReport) {
    let overall = &report.performance.overall;

    super::banner(&format!("REPLAY RESULTS: {}", report.symbol));
    println!("Bars Processed:     {}", report.bars_processed);
    println!("Signals Generated:  {}", report.signals_generated);
    println!("Signals Opened:     {}", report.signals_opened);
    println!("Outcomes Closed:    {}", report.outcomes_closed);
    println!("Still Open:         {}", report.still_open);
    println!(
        "Final Regime:       {}",
        report
            .final_regime
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".into())
    );
    println!(
        "Win / Loss / BE / Exp: {} / {} / {} / {}",
        overall.wins, overall.losses, overall.breakevens, overall.expired
    );
    println!("Win Rate:           {:.2}%", overall.win_rate * 100.0);
    println!("Avg Return:         {:.2}%", overall.avg_return);
    println!("Total Return:       {:.2}%", overall.total_return);
    println!("Profit Factor:      {:.2}", overall.profit_factor);
    println!("Avg Duration:       {:.1}h", overall.avg_duration_hours);

    if !report.performance.by_regime.is_empty() {
        println!("{}", "-".repeat(60));
        println!("{:<22} {:>6} {:>8} {:>10}", "Regime", "Count", "WinR%", "AvgRet%");
        for (regime, summary) in &report.performance.by_regime {
            println!(
                "{:<22} {:>6} {:>8.1} {:>10.2}",
                regime.to_string(),
                summary.total,
                summary.win_rate * 100.0,
                summary.avg_return
            );
        }
    }

    if !report.tuning_log.is_empty() {
        println!("{}", "-".repeat(60));
        println!("Tuning log:");
        for event in &report.tuning_log {
            println!(
                "  {} {}: {:.3} -> {:.3} (win rate {:.1}%, avg {:.2}%, n={})",
                event.timestamp.format("%Y-%m-%d %H:%M"),
                event.key,
                event.old_value,
                event.new_value,
                event.win_rate * 100.0,
                event.avg_return,
                event.sample_size
            );
        }
    }
    println!("{}", "=".repeat(60));
}
