//! Blob Client: upload a result document and get back a CID; fetch a job
//! document by CID, memoized (entries are content-addressed and therefore
//! immortal once observed).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use worknode_core::{Cid, NodeError};

/// The content-addressed object store collaborator: put JSON, get bytes by
/// CID.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_bytes(&self, bytes: &[u8]) -> Result<Cid, NodeError>;
    async fn get_bytes(&self, cid: &Cid) -> Result<Vec<u8>, NodeError>;
}

/// Wraps an [`ObjectStore`] collaborator with JSON (de)serialization and a
/// read-through memoization cache keyed by CID.
pub struct BlobClient<S> {
    store: S,
    cache: RwLock<HashMap<Cid, Arc<serde_json::Value>>>,
}

impl<S: ObjectStore> BlobClient<S> {
    pub fn new(store: S) -> Self {
        Self { store, cache: RwLock::new(HashMap::new()) }
    }

    /// Upload `value`, returning its CID. Not itself memoized — every call
    /// performs a fresh upload, matching spec's `put_json` contract.
    pub async fn put_json(&self, value: &serde_json::Value) -> Result<Cid, NodeError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.put_bytes(&bytes).await
    }

    /// Fetch and decode the document at `cid`. Subsequent calls for the
    /// same CID return the cached value without hitting the collaborator.
    pub async fn get_json(&self, cid: &Cid) -> Result<Arc<serde_json::Value>, NodeError> {
        if let Some(cached) = self.cache.read().await.get(cid) {
            return Ok(cached.clone());
        }
        let bytes = self.store.get_bytes(cid).await?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        let value = Arc::new(value);
        self.cache.write().await.insert(cid.clone(), value.clone());
        Ok(value)
    }
}

/// Default collaborator: posts/gets JSON blobs over `reqwest`, matching the
/// teacher's `fetch_work`/`submit_job` shape in its backend adapter. The
/// store is expected to content-address by SHA-256 digest of the uploaded
/// bytes, which this adapter computes itself so `put_bytes` can hand back
/// the resulting CID without relying on the server echoing it back.
pub struct HttpObjectStore {
    http: reqwest::Client,
    base: Url,
    credential: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base: Url, credential: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base, credential }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_bytes(&self, bytes: &[u8]) -> Result<Cid, NodeError> {
        let Some(credential) = &self.credential else {
            return Err(NodeError::BlobAuth("no blob-store credential configured".to_string()));
        };
        let url = self
            .base
            .join("put")
            .map_err(|err| NodeError::Misconfiguration(format!("blob url: {err}")))?;
        let res = self
            .http
            .post(url)
            .bearer_auth(credential)
            .body(bytes.to_vec())
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(NodeError::BlobAuth("blob store rejected credential".to_string()));
        }
        if !res.status().is_success() {
            return Err(NodeError::BlobTransient(format!("http {}", res.status())));
        }
        let digest: [u8; 32] = Sha256::digest(bytes).into();
        Ok(Cid::encode(digest))
    }

    async fn get_bytes(&self, cid: &Cid) -> Result<Vec<u8>, NodeError> {
        let url = self
            .base
            .join(&format!("get/{cid}"))
            .map_err(|err| NodeError::Misconfiguration(format!("blob url: {err}")))?;
        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            return Err(NodeError::BlobTransient(format!("http {}", res.status())));
        }
        Ok(res.bytes().await?.to_vec())
    }
}
