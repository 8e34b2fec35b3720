//! Integration test: curl-backed connections against a local HTTP server.

mod common;

use std::sync::Arc;

use common::{payload, s3_server, test_config, Collected};
use s3xfer_core::body::BytesBody;
use s3xfer_core::connection::CurlConnectionProvider;
use s3xfer_core::credentials::{AnonymousCredentialsProvider, PayloadHashSigner};
use s3xfer_core::http::Headers;
use s3xfer_core::{ClientResources, MetaRequestOptions, S3Client, TransferError};

fn curl_client() -> S3Client {
    let resources = ClientResources {
        connections: Arc::new(CurlConnectionProvider::default()),
        credentials: Arc::new(AnonymousCredentialsProvider),
        signer: Arc::new(PayloadHashSigner),
    };
    S3Client::with_resources(test_config(64 * 1024, 4), resources).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ranged_get_over_curl_matches_object() {
    let (host, objects) = s3_server::start();
    let body = payload(300_000);
    objects.lock().unwrap().insert("/obj.bin".to_string(), body.clone());

    let client = curl_client();
    let collected = Collected::default();
    let headers: Headers = [("Host", host.as_str())].into_iter().collect();
    let meta = client
        .create_meta_request(MetaRequestOptions::get("/obj.bin", headers).on_body(collected.callback()))
        .unwrap();
    let result = meta.finished_future().wait().await.unwrap();

    assert_eq!(result.status, 200);
    assert_eq!(result.part_count, 5);
    assert_eq!(result.headers.content_length(), Some(300_000));
    assert_eq!(collected.contiguous(), body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_put_over_curl_stores_body() {
    let (host, objects) = s3_server::start();
    let data = payload(10_000);

    let client = curl_client();
    let headers: Headers = [("Host", host.clone()), ("Content-Length", data.len().to_string())]
        .into_iter()
        .collect();
    let meta = client
        .create_meta_request(MetaRequestOptions::put(
            "/up.bin",
            headers,
            Arc::new(BytesBody::new(data.clone())),
        ))
        .unwrap();
    let result = meta.finished_future().wait().await.unwrap();

    assert_eq!(result.status, 200);
    assert_eq!(result.headers.get("etag"), Some("\"put-etag\""));
    assert_eq!(objects.lock().unwrap().get("/up.bin"), Some(&data));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_object_over_curl_is_client_error() {
    let (host, _objects) = s3_server::start();
    let client = curl_client();
    let headers: Headers = [("Host", host.as_str())].into_iter().collect();
    let meta = client
        .create_meta_request(MetaRequestOptions::get("/missing", headers))
        .unwrap();
    let err = meta.finished_future().wait().await.unwrap_err();
    assert!(
        matches!(err, TransferError::Client { status: 404, ref code, .. } if code.as_deref() == Some("NoSuchKey")),
        "{err}"
    );
}
