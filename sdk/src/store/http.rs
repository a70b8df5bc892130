use {
    super::{Buckets, Fetched, ObjectStore, ObjectVersion, Precondition, StoreError, StoredObject},
    crate::{len_u64, progress::ProgressCallback},
    anyhow::{Result, format_err},
    async_trait::async_trait,
    bytes::Bytes,
    cloudex_protocol::{AccessToken, Bucket, ObjectKey},
    futures::{StreamExt, stream},
    reqwest::{
        Body, RequestBuilder, StatusCode, Url,
        header::{CONTENT_LENGTH, ETAG, IF_MATCH, IF_NONE_MATCH},
    },
    std::{convert::Infallible, time::Duration},
    tokio::time::timeout,
    tracing::{debug, instrument},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Loading large objects may take a long time.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3600 * 24);

/// Size of the body chunks an upload is streamed in.
const UPLOAD_CHUNK_LEN: usize = 64 * 1024;

#[must_use]
#[inline]
pub fn upload_timeout(upload_size: u64) -> Duration {
    // Assuming upload speed above 1 MB/s.
    DEFAULT_TIMEOUT.saturating_add(Duration::from_micros(upload_size))
}

/// Object store reached over HTTP: `GET/PUT {endpoint}/{bucket}/{key}`.
///
/// Reuse created store or clone it in order to reuse a connection pool.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    reqwest: reqwest::Client,
    endpoint: Url,
    token: Option<AccessToken>,
    buckets: Buckets,
}

impl HttpObjectStore {
    #[inline]
    pub fn new(endpoint: Url, token: Option<AccessToken>, buckets: Buckets) -> Result<Self> {
        Ok(Self {
            endpoint,
            token,
            buckets,
            reqwest: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()?,
        })
    }

    fn object_url(&self, bucket: Bucket, key: &ObjectKey) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| format_err!("failed store URL extension"))?
            .pop_if_empty()
            .push(self.buckets.name(bucket))
            .extend(key.as_str().split('/'));
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_unmasked_str())
        } else {
            request
        }
    }
}

fn version_header(response: &reqwest::Response) -> Option<ObjectVersion> {
    response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(ObjectVersion::new)
}

fn body_chunks(data: &Bytes) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < data.len() {
        let end = start.saturating_add(UPLOAD_CHUNK_LEN).min(data.len());
        chunks.push(data.slice(start..end));
        start = end;
    }
    chunks
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    #[instrument(skip_all, fields(%bucket, %key))]
    async fn get(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        progress: Option<ProgressCallback>,
    ) -> Result<Fetched, StoreError> {
        let url = self.object_url(bucket, key).map_err(StoreError::transport)?;
        let mut response = timeout(
            DEFAULT_TIMEOUT,
            self.authorize(self.reqwest.get(url))
                .timeout(RESPONSE_TIMEOUT)
                .send(),
        )
        .await
        .map_err(StoreError::transport)?
        .map_err(StoreError::transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("object not found");
            return Ok(Fetched::NotFound);
        }
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }

        let version = version_header(&response);
        let total = response.content_length().unwrap_or(0);
        let mut data = Vec::new();
        while let Some(chunk) = timeout(DEFAULT_TIMEOUT, response.chunk())
            .await
            .map_err(StoreError::transport)?
            .map_err(StoreError::transport)?
        {
            data.extend_from_slice(&chunk);
            if let Some(progress) = &progress {
                progress(len_u64(data.len()), total);
            }
        }
        Ok(Fetched::Found(StoredObject {
            data: data.into(),
            version,
        }))
    }

    #[instrument(skip_all, fields(%bucket, %key, len = data.len()))]
    async fn put(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        data: Bytes,
        precondition: Option<Precondition>,
        progress: Option<ProgressCallback>,
    ) -> Result<(), StoreError> {
        let url = self.object_url(bucket, key).map_err(StoreError::transport)?;
        let size = len_u64(data.len());

        let mut sent = 0_u64;
        let body = stream::iter(body_chunks(&data)).map(move |chunk| {
            sent = sent.saturating_add(len_u64(chunk.len()));
            if let Some(progress) = &progress {
                progress(sent, size);
            }
            Ok::<_, Infallible>(chunk)
        });

        let mut request = self
            .authorize(self.reqwest.put(url))
            .timeout(upload_timeout(size))
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(body));
        request = match &precondition {
            Some(Precondition::IfMatch(version)) => request.header(IF_MATCH, version.as_str()),
            Some(Precondition::IfAbsent) => request.header(IF_NONE_MATCH, "*"),
            None => request,
        };

        let response = request.send().await.map_err(StoreError::transport)?;
        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED {
            return Err(StoreError::PreconditionFailed);
        }
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }
        Ok(())
    }
}
