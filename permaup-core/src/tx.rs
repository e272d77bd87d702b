//! Upload transactions: ordered tags, content reference, deterministic signing.

use crate::chunk::{self, ChunkPlan, ChunkSource};
use crate::error::{Error, Result};
use crate::merkle;
use crate::wallet::{self, Wallet};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Seek};

pub const CONTENT_TYPE_KEY: &str = "Content-Type";
pub const IPFS_KEY: &str = "IPFS-Add";
pub const IPFS_CONSTRAINT_KEY: &str = "standard";
pub const IPFS_CONSTRAINT: &str = "v0.1";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const SIGNING_DOMAIN: &[u8] = b"permaup-tx-v1";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: &str, value: &str) -> Self {
        Self { name: name.to_string(), value: value.to_string() }
    }
}

/// Ordered multimap of tags. Order is part of the signed payload.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags(Vec<Tag>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Content-Type` always; `IPFS-Add` and `standard` together, only with an IPFS id.
    pub fn for_upload(content_type: Option<&str>, ipfs: Option<&str>) -> Self {
        let mut tags = Tags::new();
        let mime = content_type.filter(|m| !m.is_empty()).unwrap_or(DEFAULT_CONTENT_TYPE);
        tags.push(CONTENT_TYPE_KEY, mime);
        if let Some(id) = ipfs.map(str::trim).filter(|id| !id.is_empty()) {
            tags.extend(ipfs_link(id));
        }
        tags
    }

    pub fn push(&mut self, name: &str, value: &str) {
        self.0.push(Tag::new(name, value));
    }

    pub fn extend(&mut self, tags: impl IntoIterator<Item = Tag>) {
        self.0.extend(tags);
    }

    /// First value under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|t| t.name == name).map(|t| t.value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().filter(move |t| t.name == name).map(|t| t.value.as_str())
    }

    pub fn as_slice(&self) -> &[Tag] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The tag pair that cross-links an upload to an IPFS id.
pub fn ipfs_link(ipfs: &str) -> [Tag; 2] {
    [Tag::new(IPFS_KEY, ipfs), Tag::new(IPFS_CONSTRAINT_KEY, IPFS_CONSTRAINT)]
}

/// What the transaction commits to: size, chunking and Merkle root of the data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentRef {
    pub plan: ChunkPlan,
    pub chunk_hashes: Vec<blake3::Hash>,
    pub data_root: blake3::Hash,
}

impl ContentRef {
    /// Plan `source` and hash every chunk.
    pub fn from_source<R: Read + Seek>(source: &mut ChunkSource<R>, chunk_size: u32) -> Result<Self> {
        let plan = chunk::plan(source.size(), chunk_size)?;
        let mut chunk_hashes = Vec::with_capacity(plan.len());
        for c in &plan.chunks {
            chunk_hashes.push(merkle::leaf(&source.read_chunk(c)?));
        }
        let data_root = merkle::root(&chunk_hashes);
        Ok(Self { plan, chunk_hashes, data_root })
    }

    pub fn data_size(&self) -> u64 {
        self.plan.file_size
    }
}

#[derive(Clone, Debug)]
struct Signed {
    signature: [u8; 64],
    id: String,
}

/// An upload transaction. Built unsigned, then [`Transaction::sign`] returns
/// a signed copy; a signed transaction cannot be edited or re-signed.
#[derive(Clone, Debug)]
pub struct Transaction {
    owner: [u8; 32],
    tags: Tags,
    content: ContentRef,
    signed: Option<Signed>,
}

impl Transaction {
    pub fn build(owner: &Wallet, tags: Tags, content: ContentRef) -> Self {
        Self { owner: owner.public_key(), tags, content, signed: None }
    }

    pub fn add_tag(&mut self, name: &str, value: &str) -> Result<()> {
        if self.signed.is_some() {
            return Err(Error::AlreadySigned);
        }
        self.tags.push(name, value);
        Ok(())
    }

    pub fn sign(&self, wallet: &Wallet) -> Result<Transaction> {
        if self.signed.is_some() {
            return Err(Error::AlreadySigned);
        }
        if wallet.public_key() != self.owner {
            return Err(Error::Signing(format!(
                "wallet {} does not own this transaction",
                wallet.address()
            )));
        }
        let digest = self.signing_digest();
        let signature = wallet.sign_digest(digest.as_bytes());
        let id = URL_SAFE_NO_PAD.encode(Sha256::digest(signature));
        Ok(Transaction { signed: Some(Signed { signature, id }), ..self.clone() })
    }

    /// BLAKE3 over a length-prefixed encoding of owner, tags, size and root.
    pub fn signing_digest(&self) -> blake3::Hash {
        let mut h = blake3::Hasher::new();
        put_field(&mut h, SIGNING_DOMAIN);
        put_field(&mut h, &self.owner);
        h.update(&(self.tags.len() as u64).to_le_bytes());
        for t in self.tags.as_slice() {
            put_field(&mut h, t.name.as_bytes());
            put_field(&mut h, t.value.as_bytes());
        }
        h.update(&self.content.data_size().to_le_bytes());
        h.update(&self.content.plan.chunk_size.to_le_bytes());
        put_field(&mut h, self.content.data_root.as_bytes());
        h.finalize()
    }

    pub fn is_signed(&self) -> bool {
        self.signed.is_some()
    }

    pub fn id(&self) -> Option<&str> {
        self.signed.as_ref().map(|s| s.id.as_str())
    }

    pub fn signature(&self) -> Option<&[u8; 64]> {
        self.signed.as_ref().map(|s| &s.signature)
    }

    pub fn owner(&self) -> &[u8; 32] {
        &self.owner
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn content(&self) -> &ContentRef {
        &self.content
    }

    /// Signature check against the owner key embedded in the transaction.
    pub fn verify(&self) -> bool {
        match &self.signed {
            Some(s) => wallet::verify_signature(
                &self.owner,
                self.signing_digest().as_bytes(),
                &s.signature,
            ),
            None => false,
        }
    }

    /// Wire header of a signed transaction.
    pub fn header(&self) -> Result<TxHeader> {
        let s = self
            .signed
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("transaction is not signed".into()))?;
        Ok(TxHeader {
            format: 2,
            id: s.id.clone(),
            owner: URL_SAFE_NO_PAD.encode(self.owner),
            tags: self.tags.as_slice().to_vec(),
            data_size: self.content.data_size().to_string(),
            chunk_size: self.content.plan.chunk_size,
            data_root: URL_SAFE_NO_PAD.encode(self.content.data_root.as_bytes()),
            signature: URL_SAFE_NO_PAD.encode(s.signature),
        })
    }
}

fn put_field(h: &mut blake3::Hasher, bytes: &[u8]) {
    h.update(&(bytes.len() as u64).to_le_bytes());
    h.update(bytes);
}

/// JSON header posted before any chunk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxHeader {
    pub format: u32,
    pub id: String,
    pub owner: String,
    pub tags: Vec<Tag>,
    pub data_size: String,
    pub chunk_size: u32,
    pub data_root: String,
    pub signature: String,
}
