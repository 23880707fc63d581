use std::fmt::{Display, Formatter};

use crate::messaging::envelope::EnvelopeError;

const ERROR_PREFIX: &str = "Error:";

/// The textual acknowledgment a receiver returns for every frame. Failures are marked by an
///  `Error:` prefix, everything else is a success.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Ack {
    Ok(String),
    Error(String),
}

impl Ack {
    pub fn ok(text: impl Into<String>) -> Ack {
        Ack::Ok(text.into())
    }

    pub fn error(text: impl Into<String>) -> Ack {
        Ack::Error(text.into())
    }

    pub fn parse(raw: &str) -> Ack {
        let trimmed = raw.trim_start();
        match trimmed.strip_prefix(ERROR_PREFIX) {
            Some(reason) => Ack::Error(reason.trim().to_string()),
            None => Ack::Ok(raw.to_string()),
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Ack {
        Self::parse(&String::from_utf8_lossy(buf))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Ack::Ok(_))
    }

    /// A rejection means the receiver looked at the message and will never accept it: it
    ///  failed authentication, its checksum or parsing. Resending it is pointless.
    pub fn is_rejection(&self) -> bool {
        match self {
            Ack::Ok(_) => false,
            Ack::Error(reason) => {
                let reason = reason.to_ascii_lowercase();
                reason.starts_with("decryption failed")
                    || reason.starts_with("checksum mismatch")
                    || reason.starts_with("malformed")
            }
        }
    }
}

impl Display for Ack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Ack::Ok(text) => write!(f, "{}", text),
            Ack::Error(reason) => write!(f, "{} {}", ERROR_PREFIX, reason),
        }
    }
}

impl From<&EnvelopeError> for Ack {
    fn from(value: &EnvelopeError) -> Self {
        Ack::Error(value.to_string())
    }
}
