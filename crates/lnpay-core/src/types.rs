use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Compressed secp256k1 public key identifying a node, kept in its 66-character hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parse and validate a hex-encoded node id.
    pub fn new(hex_id: &str) -> Result<Self, CoreError> {
        let lowered = hex_id.to_ascii_lowercase();
        if lowered.len() != 66 {
            return Err(CoreError::InvalidNodeId(format!(
                "expected 66 hex characters, got {}",
                lowered.len()
            )));
        }
        if !lowered.starts_with("02") && !lowered.starts_with("03") {
            return Err(CoreError::InvalidNodeId(format!(
                "{hex_id} is not a compressed public key"
            )));
        }
        hex::decode(&lowered).map_err(|e| CoreError::InvalidNodeId(e.to_string()))?;
        Ok(Self(lowered))
    }

    /// Build a node id from its 33 raw bytes.
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CoreError> {
        Self::new(&hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Channel identifier derived from the funding output's position on chain,
/// written as `BLOCKxTXxOUTPUT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortChannelId {
    pub block_height: u32,
    pub tx_index: u32,
    pub output_index: u16,
}

impl ShortChannelId {
    pub fn new(block_height: u32, tx_index: u32, output_index: u16) -> Self {
        Self {
            block_height,
            tx_index,
            output_index,
        }
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block_height, self.tx_index, self.output_index
        )
    }
}

impl FromStr for ShortChannelId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('x').collect();
        if parts.len() != 3 {
            return Err(CoreError::InvalidChannelId(s.to_string()));
        }
        let invalid = |_| CoreError::InvalidChannelId(s.to_string());
        Ok(Self {
            block_height: parts[0].parse().map_err(invalid)?,
            tx_index: parts[1].parse().map_err(invalid)?,
            output_index: parts[2].parse().map_err(invalid)?,
        })
    }
}

impl TryFrom<String> for ShortChannelId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ShortChannelId> for String {
    fn from(id: ShortChannelId) -> Self {
        id.to_string()
    }
}

fn decode_32(s: &str) -> Result<[u8; 32], CoreError> {
    let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| CoreError::InvalidHex(format!("expected 32 bytes, got {}", v.len())))
}

/// 32-byte identifier of a payment: the hash of its preimage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentHash(pub [u8; 32]);

impl PaymentHash {
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_32(s).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for PaymentHash {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<PaymentHash> for String {
    fn from(hash: PaymentHash) -> Self {
        hash.to_hex()
    }
}

/// Secret whose revelation settles every HTLC locked to its hash.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
    /// Draw a fresh random preimage.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_32(s).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// BLAKE3 digest of the preimage, used as the payment hash.
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(*blake3::hash(&self.0).as_bytes())
    }

    /// Whether this preimage unlocks `hash`.
    pub fn matches(&self, hash: &PaymentHash) -> bool {
        self.payment_hash() == *hash
    }
}

// Preimages are secrets; keep them out of debug logs.
impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage(..)")
    }
}

impl TryFrom<String> for Preimage {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Preimage> for String {
    fn from(preimage: Preimage) -> Self {
        preimage.to_hex()
    }
}
