//! Delivery of transfer units to the server.
//!
//! [`ChunkTransport`] is the seam between the sequential upload driver and
//! the network. [`HttpTransport`] posts each unit as `multipart/form-data`
//! to the server's chunk endpoint and decodes the JSON [`ChunkResponse`].

#[cfg(test)]
mod tests;

use crate::client::error::ClientError;
use crate::client::splitter::TransferUnit;
use async_trait::async_trait;
use chunkwise_core::wire::{self, CHUNK_ENDPOINT};
use chunkwise_core::{ChunkAck, ChunkResponse, EntityTarget};
use core::time::Duration;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client as HttpClient, Url};

const CHUNKWISE_USER_AGENT: &str = concat!("chunkwise-client/", env!("CARGO_PKG_VERSION"));

/// Sends one transfer unit and returns the server's acknowledgement.
///
/// A server-side rejection is returned as [`ClientError::Rejected`] with the
/// code the server reported.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn send(&self, unit: TransferUnit) -> Result<ChunkAck, ClientError>;
}

#[async_trait]
impl<T> ChunkTransport for &T
where
    T: ChunkTransport + ?Sized,
{
    async fn send(&self, unit: TransferUnit) -> Result<ChunkAck, ClientError> {
        (**self).send(unit).await
    }
}

/// Chunk transport over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: Url,
    client: HttpClient,
}

impl HttpTransport {
    /// Targets the server rooted at `base_url`.
    ///
    /// `token` is forwarded as a bearer `Authorization` header; the server
    /// side authenticates before requests reach the upload service.
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self, ClientError> {
        let endpoint = format!("{}{CHUNK_ENDPOINT}", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| ClientError::Config(format!("invalid endpoint `{base_url}`: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CHUNKWISE_USER_AGENT));
        if let Some(token) = token {
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::Config("token is not a valid header value".into()))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }

        let client = HttpClient::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(chunk_index = unit.chunk_index, total_chunks = unit.total_chunks)
    )]
    async fn send(&self, unit: TransferUnit) -> Result<ChunkAck, ClientError> {
        let form = build_form(unit)?;
        let res = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        let status = res.status();
        let body = res.bytes().await?;
        match serde_json::from_slice::<ChunkResponse>(&body) {
            Ok(response) => response
                .into_result()
                .map_err(|(code, message)| ClientError::Rejected { code, message }),
            Err(_) if status.is_success() => Err(ClientError::Protocol(format!(
                "HTTP {} with an undecodable body",
                status.as_u16()
            ))),
            Err(_) => Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}

fn build_form(unit: TransferUnit) -> Result<Form, ClientError> {
    let mut form = Form::new()
        .text(wire::FIELD_CHUNK_INDEX, unit.chunk_index.to_string())
        .text(wire::FIELD_TOTAL_CHUNKS, unit.total_chunks.to_string())
        .text(wire::FIELD_FILENAME, unit.filename.clone());

    if let Some(token) = unit.session_token {
        form = form.text(wire::FIELD_SESSION_TOKEN, token.to_string());
    }

    if let Some(first) = unit.first_chunk {
        let metadata = first.metadata;
        form = form
            .text(wire::FIELD_TITLE, metadata.title)
            .text(wire::FIELD_ACTIVE, metadata.active.to_string());
        for (name, value) in [
            (wire::FIELD_CATEGORY, metadata.category),
            (wire::FIELD_DATE, metadata.date),
            (wire::FIELD_CONTENT, metadata.content),
        ] {
            if let Some(value) = value {
                form = form.text(name, value);
            }
        }
        if let EntityTarget::Update(id) = first.target {
            form = form.text(wire::FIELD_ENTITY_ID, id.to_string());
        }
        if let Some(cover) = first.cover_image {
            let len = cover.bytes.len() as u64;
            let mut part =
                Part::stream_with_length(Body::from(cover.bytes), len).file_name(cover.filename);
            if let Some(content_type) = cover.content_type {
                part = part.mime_str(&content_type)?;
            }
            form = form.part(wire::FIELD_COVER_IMAGE, part);
        }
    }

    let len = unit.bytes.len() as u64;
    let chunk = Part::stream_with_length(Body::from(unit.bytes), len)
        .file_name(unit.filename)
        .mime_str("application/octet-stream")?;
    Ok(form.part(wire::FIELD_CHUNK, chunk))
}
