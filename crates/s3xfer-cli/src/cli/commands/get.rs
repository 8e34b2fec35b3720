//! `s3xfer get` – download an object into a local file.

use anyhow::{anyhow, Result};
use s3xfer_core::config::ClientConfig;
use s3xfer_core::storage::StorageWriter;
use s3xfer_core::{MetaRequestOptions, S3Client, TransferResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::progress;
use crate::cli::ObjectTarget;

pub async fn run_get(
    cfg: &ClientConfig,
    target: &ObjectTarget,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let final_path = output.unwrap_or_else(|| PathBuf::from(target.file_name()));
    let writer = Arc::new(StorageWriter::create(&final_path)?);
    let client = S3Client::new(cfg.clone())?;
    let (progress_tx, printer) = progress::spawn_printer(json);

    let sink = Arc::clone(&writer);
    let options = MetaRequestOptions::get(target.path.clone(), target.headers())
        .on_body(move |data, offset| sink.write_at(offset, data))
        .progress(progress_tx);
    let meta = client.create_meta_request(options)?;
    tracing::info!(id = meta.id(), host = %target.host, path = %target.path, "get started");

    let shutdown = meta.shutdown_event();
    let result = meta.finished_future().wait().await;
    drop(meta);
    // The body callback holds the writer until the meta-request is released.
    shutdown.wait().await;
    let _ = printer.await;

    let writer = Arc::try_unwrap(writer).map_err(|_| anyhow!("body writer still shared after release"))?;
    match result {
        Ok(result) => {
            writer.sync()?;
            writer.finalize(&final_path)?;
            report(&result, &final_path, json);
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = writer.discard() {
                tracing::warn!("could not remove temp file: {:#}", cleanup);
            }
            Err(e.into())
        }
    }
}

fn report(result: &TransferResult, path: &Path, json: bool) {
    if json {
        let summary = serde_json::json!({
            "status": result.status,
            "bytes": result.total_bytes,
            "parts": result.part_count,
            "etag": result.headers.get("etag"),
            "path": path.display().to_string(),
        });
        println!("{}", summary);
    } else {
        println!(
            "Downloaded {} bytes in {} part(s) to {}",
            result.total_bytes,
            result.part_count,
            path.display()
        );
    }
}
