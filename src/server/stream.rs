//! JSON responses, streamed in chunks once they exceed a size threshold.
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_CAPACITY: usize = 8;

/// Serializes `value` into a JSON response.
pub fn json_response<T: Serialize>(value: &T, threshold: usize) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => raw_json_response(body, threshold),
        Err(e) => {
            tracing::error!(error = %e, "cannot serialize a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Sends already serialized JSON.
pub fn raw_json_response(body: Vec<u8>, threshold: usize) -> Response {
    let body = if body.len() > threshold {
        tracing::debug!(bytes = body.len(), "streaming response");
        Body::from_stream(chunked(body))
    } else {
        Body::from(body)
    };
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Feeds `body` through a bounded channel; the producer stops once the client is gone.
fn chunked(
    body: Vec<u8>,
) -> impl futures::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        for chunk in body.chunks(CHUNK_SIZE) {
            if tx.send(chunk.to_vec()).await.is_err() {
                tracing::debug!("client went away while streaming");
                break;
            }
        }
    });
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok(chunk), rx))
    })
}
