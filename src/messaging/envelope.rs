use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use aead::{AeadCore, AeadInPlace, Key, KeyInit, Nonce, OsRng, Tag};
use aes_gcm::Aes128Gcm;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::messaging::canonical::payload_checksum;

/// A message's plaintext: field name -> value. serde_json's map keeps keys sorted, which is the
///  canonical order checksums are computed in.
pub type Payload = serde_json::Map<String, Value>;

pub const CHECKSUM_FIELD: &str = "checksum";

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// authentication tag did not verify: tampering or wrong key
    #[error("Decryption failed")]
    Integrity,
    #[error("Checksum mismatch detected!")]
    Checksum,
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl EnvelopeError {
    fn malformed(e: impl Display) -> EnvelopeError {
        EnvelopeError::Malformed(e.to_string())
    }
}


/// The ordered list of nodes a message has passed through. It is used for loop avoidance only,
///  it is never a routing instruction.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Path(Vec<String>);

impl Path {
    pub const SEPARATOR: &'static str = "-->";

    pub fn new() -> Path {
        Path(Vec::new())
    }

    pub fn starting_at(node: impl Into<String>) -> Path {
        Path(vec![node.into()])
    }

    pub fn push(&mut self, node: impl Into<String>) {
        self.0.push(node.into());
    }

    pub fn contains(&self, node: &str) -> bool {
        self.0.iter().any(|n| n == node)
    }

    pub fn nodes(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_str())
    }

    /// A node name must survive rendering and parsing a path unchanged, otherwise loop
    ///  detection cannot find it on the path.
    pub fn check_node_name(name: &str) -> anyhow::Result<()> {
        if name.trim().is_empty() {
            bail!("node name must not be empty");
        }
        if name.trim() != name {
            bail!("node name {:?} has leading or trailing whitespace", name);
        }
        if name.contains(Self::SEPARATOR) {
            bail!("node name {:?} contains the path separator {:?}", name, Self::SEPARATOR);
        }
        Ok(())
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(Self::SEPARATOR))
    }
}
impl Debug for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self)
    }
}

impl FromStr for Path {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Path::new());
        }
        let nodes = s.split(Self::SEPARATOR)
            .map(|n| n.trim().to_string())
            .collect::<Vec<_>>();
        if nodes.iter().any(|n| n.is_empty()) {
            bail!("empty node name in path {:?}", s);
        }
        Ok(Path(nodes))
    }
}

impl <S: Into<String>> FromIterator<S> for Path {
    fn from_iter<T: IntoIterator<Item=S>>(iter: T) -> Self {
        Path(iter.into_iter().map(Into::into).collect())
    }
}


/// JSON object exchanged on the wire - binary fields are hex encoded, the path is rendered as
///  `A-->B-->C`. Directory requests carry no path.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct WireMessage {
    pub iv: String,
    pub encrypted_data: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}


#[derive(Clone, Eq, PartialEq)]
pub struct Envelope {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
    pub path: Path,
}

impl Debug for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Envelope{{iv:{}, {} bytes, path:{:?}}}", hex::encode(self.iv), self.ciphertext.len(), self.path)
    }
}

impl Envelope {
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            iv: hex::encode(self.iv),
            encrypted_data: hex::encode(&self.ciphertext),
            tag: hex::encode(self.tag),
            path: if self.path.is_empty() { None } else { Some(self.path.to_string()) },
        }
    }

    pub fn from_wire(wire: &WireMessage) -> Result<Envelope, EnvelopeError> {
        let iv = decode_fixed::<IV_LEN>("iv", &wire.iv)?;
        let tag = decode_fixed::<TAG_LEN>("tag", &wire.tag)?;
        let ciphertext = hex::decode(&wire.encrypted_data)
            .map_err(|e| EnvelopeError::Malformed(format!("encrypted_data: {}", e)))?;
        let path = match &wire.path {
            Some(p) => p.parse().map_err(EnvelopeError::malformed)?,
            None => Path::new(),
        };

        Ok(Envelope { iv, ciphertext, tag, path })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // serializing a struct of strings cannot fail
        serde_json::to_vec(&self.to_wire()).unwrap_or_default()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Envelope, EnvelopeError> {
        let wire: WireMessage = serde_json::from_slice(buf).map_err(EnvelopeError::malformed)?;
        Self::from_wire(&wire)
    }
}

fn decode_fixed<const N: usize>(field: &str, hex_str: &str) -> Result<[u8; N], EnvelopeError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| EnvelopeError::Malformed(format!("{}: {}", field, e)))?;
    bytes.try_into()
        .map_err(|b: Vec<u8>| EnvelopeError::Malformed(format!("{} must be {} bytes, was {}", field, N, b.len())))
}


/// Seals and opens envelopes with the network's shared AES-128 key.
pub struct EnvelopeCodec {
    cipher: Aes128Gcm,
}

impl Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnvelopeCodec")
    }
}

impl EnvelopeCodec {
    pub fn new(shared_key: &[u8]) -> anyhow::Result<EnvelopeCodec> {
        if shared_key.len() != KEY_LEN {
            bail!("shared key must be {} bytes, was {}", KEY_LEN, shared_key.len());
        }
        let key = Key::<Aes128Gcm>::from_slice(shared_key);
        Ok(EnvelopeCodec { cipher: Aes128Gcm::new(key) })
    }

    /// Adds a checksum over the payload's other fields and encrypts the result with a fresh
    ///  random nonce. A `checksum` field already present in the payload is replaced.
    pub fn seal(&self, payload: &Payload, path: Path) -> anyhow::Result<Envelope> {
        let mut payload = payload.clone();
        payload.remove(CHECKSUM_FIELD);
        let checksum = payload_checksum(&payload)?;
        payload.insert(CHECKSUM_FIELD.to_string(), Value::String(checksum));

        let mut buf = serde_json::to_vec(&payload)?;

        let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
        let tag = self.cipher.encrypt_in_place_detached(&nonce, b"", &mut buf)
            .map_err(|e| anyhow::anyhow!("encryption error: {}", e))?;

        Ok(Envelope {
            iv: nonce.into(),
            ciphertext: buf,
            tag: tag.into(),
            path,
        })
    }

    /// Decrypts and authenticates. The returned payload still contains its checksum field.
    pub fn open(&self, envelope: &Envelope) -> Result<Payload, EnvelopeError> {
        let mut buf = envelope.ciphertext.clone();
        self.cipher.decrypt_in_place_detached(
            Nonce::<Aes128Gcm>::from_slice(&envelope.iv),
            b"",
            &mut buf,
            Tag::<Aes128Gcm>::from_slice(&envelope.tag),
        )
            .map_err(|_| EnvelopeError::Integrity)?;

        serde_json::from_slice(&buf).map_err(EnvelopeError::malformed)
    }

    /// [EnvelopeCodec::open] followed by [verify_checksum], returning the payload without its
    ///  checksum field.
    pub fn open_verified(&self, envelope: &Envelope) -> Result<Payload, EnvelopeError> {
        let mut payload = self.open(envelope)?;
        if verify_checksum(&mut payload) {
            Ok(payload)
        }
        else {
            Err(EnvelopeError::Checksum)
        }
    }
}

/// Removes the payload's `checksum` field and compares it to the checksum recomputed over the
///  remaining fields. A missing checksum never matches.
pub fn verify_checksum(payload: &mut Payload) -> bool {
    let received = payload.remove(CHECKSUM_FIELD);
    match (received, payload_checksum(payload)) {
        (Some(Value::String(received)), Ok(calculated)) => received == calculated,
        _ => false,
    }
}
