//! `s3xfer config` – show config location and effective values.

use anyhow::Result;
use s3xfer_core::config::{self, ClientConfig};

pub fn run_config(cfg: &ClientConfig) -> Result<()> {
    println!("config file: {}", config::config_path()?.display());
    println!("region:            {}", cfg.region);
    println!("part size:         {} bytes", cfg.effective_part_size());
    println!("max concurrency:   {}", cfg.effective_concurrency());
    println!("buffered parts:    {}", cfg.effective_buffered_parts());
    println!("secure:            {}", cfg.secure);
    let retry = cfg.retry_policy();
    println!(
        "retry:             {} attempts, {:?} base, {:?} cap",
        retry.max_attempts, retry.base_delay, retry.max_delay
    );
    Ok(())
}
