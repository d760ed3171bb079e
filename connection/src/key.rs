//! Persistent node identity.

use crate::peer::{NodeId, NODE_ID_BYTES};
use log::info;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

/// Secret material a node derives its [`NodeId`] from.
///
/// The identifier is the first [`NODE_ID_BYTES`] of the SHA-256 digest of the
/// key, hex encoded.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeKey {
    #[serde(with = "hex_bytes")]
    priv_key: [u8; 32],
}

impl NodeKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut priv_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut priv_key);
        NodeKey { priv_key }
    }

    /// Load the key stored at `path`, or generate and store a new one.
    pub fn load_or_generate(path: &Path) -> io::Result<Self> {
        if path.exists() {
            let raw = fs::read(path)?;
            return serde_json::from_slice(&raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }

        let key = NodeKey::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec_pretty(&key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, raw)?;
        info!("Generated new node key {} at {}", key.id(), path.display());
        Ok(key)
    }

    /// The identifier derived from this key.
    pub fn id(&self) -> NodeId {
        let digest = Sha256::digest(self.priv_key);
        let mut bytes = [0u8; NODE_ID_BYTES];
        bytes.copy_from_slice(&digest[..NODE_ID_BYTES]);
        NodeId::from_bytes(bytes)
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeKey({})", self.id())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
