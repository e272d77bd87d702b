//! Wire side of an upload: header submission, chunk posts, tag lookups.

use crate::error::{Error, Result};
use crate::tx::{Tag, TxHeader};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_GATEWAY: &str = "https://arweave.net";

/// Body of one chunk post. Chunks of a transaction are keyed by offset.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkUpload {
    pub tx_id: String,
    pub data_root: String,
    pub data_size: String,
    #[serde(with = "u64_string")]
    pub offset: u64,
    pub chunk: String,
}

/// Gateways exchange integers as decimal strings.
mod u64_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(|e| D::Error::custom(format!("offset {raw:?}: {e}")))
    }
}

impl ChunkUpload {
    pub fn new(header: &TxHeader, offset: u64, data: &[u8]) -> Self {
        Self {
            tx_id: header.id.clone(),
            data_root: header.data_root.clone(),
            data_size: header.data_size.clone(),
            offset,
            chunk: URL_SAFE_NO_PAD.encode(data),
        }
    }

    pub fn data(&self) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(&self.chunk)
            .map_err(|e| Error::InvalidInput(format!("chunk body is not base64url: {e}")))
    }
}

/// Blocking calls against a storage gateway.
///
/// Implementations report transient failures as [`Error::Network`] and
/// content-level refusals as [`Error::ServerRejected`].
pub trait Transport {
    fn submit_header(&self, header: &TxHeader) -> Result<()>;

    fn upload_chunk(&self, chunk: &ChunkUpload) -> Result<()>;

    /// Id of an existing transaction carrying all of `tags`, if any.
    fn find_by_tags(&self, tags: &[Tag]) -> Result<Option<String>>;
}

/// reqwest-backed gateway client.
pub struct HttpTransport {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("permaup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("build HTTP client: {e}")))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_json<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| Error::Network(format!("POST {url}: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .bytes()
                .map(|b| b.to_vec())
                .map_err(|e| Error::Network(format!("POST {url}: read body: {e}")));
        }
        let body = resp.text().unwrap_or_default();
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            Err(Error::Network(format!("POST {url}: {status}")))
        } else {
            Err(Error::ServerRejected(format!("{status}: {}", body.trim())))
        }
    }
}

impl Transport for HttpTransport {
    fn submit_header(&self, header: &TxHeader) -> Result<()> {
        self.post_json("/tx", header)?;
        Ok(())
    }

    fn upload_chunk(&self, chunk: &ChunkUpload) -> Result<()> {
        self.post_json("/chunk", chunk)?;
        Ok(())
    }

    fn find_by_tags(&self, tags: &[Tag]) -> Result<Option<String>> {
        let filters: Vec<serde_json::Value> = tags
            .iter()
            .map(|t| serde_json::json!({ "name": t.name, "values": [t.value] }))
            .collect();
        let body = serde_json::json!({
            "query": "query($tags: [TagFilter!]) { transactions(tags: $tags, first: 1) { edges { node { id } } } }",
            "variables": { "tags": filters },
        });
        let raw = self.post_json("/graphql", &body)?;
        let resp: GraphqlResponse = serde_json::from_slice(&raw)?;
        Ok(resp.data.transactions.edges.into_iter().next().map(|e| e.node.id))
    }
}

#[derive(Deserialize)]
struct GraphqlResponse {
    data: GraphqlData,
}

#[derive(Deserialize)]
struct GraphqlData {
    transactions: GraphqlConnection,
}

#[derive(Deserialize)]
struct GraphqlConnection {
    edges: Vec<GraphqlEdge>,
}

#[derive(Deserialize)]
struct GraphqlEdge {
    node: GraphqlNode,
}

#[derive(Deserialize)]
struct GraphqlNode {
    id: String,
}

/// A scripted failure for [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    Network,
    Reject(String),
}

impl Fault {
    fn into_error(self) -> Error {
        match self {
            Fault::Network => Error::Network("injected network fault".into()),
            Fault::Reject(reason) => Error::ServerRejected(reason),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    headers: Vec<TxHeader>,
    accepted: Vec<ChunkUpload>,
    attempts: Vec<(String, u64)>,
    header_faults: VecDeque<Fault>,
    chunk_faults: VecDeque<Fault>,
    known: Vec<(Vec<Tag>, String)>,
}

/// In-process gateway for tests. Records everything it accepts
/// and can fail upcoming calls on demand.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_header(&self, fault: Fault) {
        self.lock().header_faults.push_back(fault);
    }

    /// Queue failures for the next chunk posts, in order.
    pub fn fail_next_chunks(&self, faults: impl IntoIterator<Item = Fault>) {
        self.lock().chunk_faults.extend(faults);
    }

    /// Pretend a transaction with `tags` already exists under `id`.
    pub fn insert_known(&self, tags: Vec<Tag>, id: &str) {
        self.lock().known.push((tags, id.to_string()));
    }

    pub fn headers(&self) -> Vec<TxHeader> {
        self.lock().headers.clone()
    }

    pub fn accepted_chunks(&self) -> Vec<ChunkUpload> {
        self.lock().accepted.clone()
    }

    /// Every chunk post seen, failed or not, as `(tx_id, offset)`.
    pub fn chunk_attempts(&self) -> Vec<(String, u64)> {
        self.lock().attempts.clone()
    }

    /// Reassemble the accepted bytes of `tx_id` in offset order.
    pub fn stored_data(&self, tx_id: &str) -> Result<Vec<u8>> {
        let st = self.lock();
        let mut chunks: Vec<&ChunkUpload> =
            st.accepted.iter().filter(|c| c.tx_id == tx_id).collect();
        chunks.sort_by_key(|c| c.offset);
        let mut out = Vec::new();
        for c in chunks {
            out.extend_from_slice(&c.data()?);
        }
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn submit_header(&self, header: &TxHeader) -> Result<()> {
        let mut st = self.lock();
        if let Some(f) = st.header_faults.pop_front() {
            return Err(f.into_error());
        }
        if !st.headers.iter().any(|h| h.id == header.id) {
            st.headers.push(header.clone());
        }
        Ok(())
    }

    fn upload_chunk(&self, chunk: &ChunkUpload) -> Result<()> {
        let mut st = self.lock();
        st.attempts.push((chunk.tx_id.clone(), chunk.offset));
        if let Some(f) = st.chunk_faults.pop_front() {
            return Err(f.into_error());
        }
        if !st.headers.iter().any(|h| h.id == chunk.tx_id) {
            return Err(Error::ServerRejected(format!("unknown transaction {}", chunk.tx_id)));
        }
        st.accepted.push(chunk.clone());
        Ok(())
    }

    fn find_by_tags(&self, tags: &[Tag]) -> Result<Option<String>> {
        let st = self.lock();
        let matches = |have: &[Tag]| tags.iter().all(|want| have.contains(want));
        let known = st.known.iter().find(|(have, _)| matches(have)).map(|(_, id)| id.clone());
        let posted = || st.headers.iter().find(|h| matches(&h.tags)).map(|h| h.id.clone());
        Ok(known.or_else(posted))
    }
}
