//! `s3xfer put` – upload a local file.

use anyhow::{Context, Result};
use s3xfer_core::body::{BodySource, FileBody};
use s3xfer_core::checksum;
use s3xfer_core::config::ClientConfig;
use s3xfer_core::{MetaRequestOptions, S3Client};
use std::path::Path;
use std::sync::Arc;

use super::progress;
use crate::cli::ObjectTarget;

pub async fn run_put(cfg: &ClientConfig, target: &ObjectTarget, file: &Path, json: bool) -> Result<()> {
    let body = Arc::new(
        FileBody::open(file).with_context(|| format!("open {}", file.display()))?,
    );
    let len = body.len();
    let digest_path = file.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || checksum::sha256_path(&digest_path));

    let mut headers = target.headers();
    headers.insert("Content-Length", len.to_string());
    let client = S3Client::new(cfg.clone())?;
    let (progress_tx, printer) = progress::spawn_printer(json);
    let meta = client.create_meta_request(
        MetaRequestOptions::put(target.path.clone(), headers, body).progress(progress_tx),
    )?;
    tracing::info!(id = meta.id(), host = %target.host, path = %target.path, bytes = len, "put started");

    let result = meta.finished_future().wait().await;
    drop(meta);
    let _ = printer.await;
    let result = result?;
    let digest = digest.await.context("checksum task")??;

    if json {
        let summary = serde_json::json!({
            "status": result.status,
            "bytes": result.total_bytes,
            "parts": result.part_count,
            "etag": result.headers.get("etag"),
            "sha256": digest,
        });
        println!("{}", summary);
    } else {
        println!(
            "Uploaded {} bytes in {} part(s); sha256 {}",
            result.total_bytes, result.part_count, digest
        );
    }
    Ok(())
}
