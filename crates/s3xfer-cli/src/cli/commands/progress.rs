//! Progress line printer shared by get and put.

use s3xfer_core::scheduler::ProgressStats;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const PROGRESS_INTERVAL_MS: u64 = 500;

/// Spawn a task printing progress snapshots. Quiet mode drains the channel
/// without printing.
pub fn spawn_printer(quiet: bool) -> (mpsc::Sender<ProgressStats>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ProgressStats>(16);
    let handle = tokio::spawn(async move {
        let mut last_print = Instant::now();
        let mut printed = false;
        while let Some(stats) = rx.recv().await {
            if quiet {
                continue;
            }
            let now = Instant::now();
            if now.duration_since(last_print).as_millis() as u64 >= PROGRESS_INTERVAL_MS
                || stats.parts_done >= stats.part_count
            {
                let done_mib = stats.bytes_done as f64 / 1_048_576.0;
                let total_mib = stats.total_bytes as f64 / 1_048_576.0;
                let rate_mib = stats.bytes_per_sec() / 1_048_576.0;
                let eta = stats
                    .eta_secs()
                    .map(|s| format!("{:.0}s", s))
                    .unwrap_or_else(|| "?".to_string());
                print!(
                    "\r  {:.1} / {:.1} MiB ({:.1}%)  part {}/{}  {:.2} MiB/s  ETA {}  ",
                    done_mib,
                    total_mib,
                    stats.fraction() * 100.0,
                    stats.parts_done,
                    stats.part_count,
                    rate_mib,
                    eta
                );
                printed = true;
                last_print = now;
            }
        }
        if printed {
            println!();
        }
    });
    (tx, handle)
}
