//! Transfer descriptors (magnet links and raw metainfo) and their syntax checks.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SessionError, SessionResult};
use shadow_events::JobId;

/// Upper bound on accepted metainfo payloads.
pub const MAX_METAINFO_BYTES: usize = 5 * 1024 * 1024;

const BTIH_PREFIX: &str = "urn:btih:";
const BTMH_PREFIX: &str = "urn:btmh:";

/// Opaque reference the engine uses to locate and start a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Descriptor {
    /// Magnet URI carrying the info hash.
    Magnet {
        /// Magnet URI to resolve and add.
        uri: String,
    },
    /// Raw bencoded `.torrent` metainfo.
    Metainfo {
        /// Bencoded metainfo payload, base64 encoded on the wire.
        #[serde(with = "metainfo_base64")]
        bytes: Vec<u8>,
    },
}

impl Descriptor {
    /// Convenience constructor for magnet-based descriptors.
    #[must_use]
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Convenience constructor for metainfo-based descriptors.
    #[must_use]
    pub fn metainfo(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Metainfo {
            bytes: bytes.into(),
        }
    }

    /// Parse user input: a magnet URI or a bare 40 character hex info hash.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidDescriptor`] when the input is neither.
    pub fn parse(input: &str) -> SessionResult<Self> {
        let trimmed = input.trim();
        let descriptor = if trimmed.len() == 40 && is_hex(trimmed) {
            Self::magnet(format!("magnet:?xt={BTIH_PREFIX}{trimmed}"))
        } else {
            Self::magnet(trimmed)
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check descriptor syntax without contacting the engine.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidDescriptor`] describing the first problem found.
    pub fn validate(&self) -> SessionResult<()> {
        match self {
            Self::Magnet { uri } => magnet_hash(uri).map(|_| ()),
            Self::Metainfo { bytes } => validate_metainfo(bytes),
        }
    }

    /// Content fingerprint when it can be read from the descriptor itself.
    ///
    /// Magnet hashes are returned exactly as written; metainfo fingerprints are
    /// only known once the engine has parsed the payload.
    #[must_use]
    pub fn fingerprint(&self) -> Option<JobId> {
        match self {
            Self::Magnet { uri } => magnet_hash(uri).ok().map(JobId::new),
            Self::Metainfo { .. } => None,
        }
    }

    /// Display name advertised by the descriptor (`dn` for magnets).
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        match self {
            Self::Magnet { uri } => Url::parse(uri).ok().and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "dn")
                    .map(|(_, value)| value.into_owned())
                    .filter(|value| !value.trim().is_empty())
            }),
            Self::Metainfo { .. } => None,
        }
    }
}

fn magnet_hash(uri: &str) -> SessionResult<String> {
    let url = Url::parse(uri).map_err(|_| SessionError::InvalidDescriptor {
        reason: "not a valid URI",
    })?;
    if !url.scheme().eq_ignore_ascii_case("magnet") {
        return Err(SessionError::InvalidDescriptor {
            reason: "unsupported URI scheme",
        });
    }

    let mut saw_topic = false;
    for (key, value) in url.query_pairs() {
        if key != "xt" {
            continue;
        }
        saw_topic = true;
        if let Some(hash) = strip_prefix_ignore_case(&value, BTIH_PREFIX) {
            if (hash.len() == 40 && is_hex(hash)) || (hash.len() == 32 && is_base32(hash)) {
                return Ok(hash.to_string());
            }
            return Err(SessionError::InvalidDescriptor {
                reason: "malformed btih hash",
            });
        }
        if let Some(hash) = strip_prefix_ignore_case(&value, BTMH_PREFIX) {
            if hash.len() == 68 && hash.starts_with("1220") && is_hex(hash) {
                return Ok(hash.to_string());
            }
            return Err(SessionError::InvalidDescriptor {
                reason: "malformed btmh hash",
            });
        }
    }

    Err(SessionError::InvalidDescriptor {
        reason: if saw_topic {
            "unsupported exact topic"
        } else {
            "missing exact topic"
        },
    })
}

fn validate_metainfo(bytes: &[u8]) -> SessionResult<()> {
    if bytes.is_empty() {
        return Err(SessionError::InvalidDescriptor {
            reason: "empty metainfo",
        });
    }
    if bytes.len() > MAX_METAINFO_BYTES {
        return Err(SessionError::InvalidDescriptor {
            reason: "metainfo too large",
        });
    }
    if bytes.first() != Some(&b'd') || bytes.last() != Some(&b'e') {
        return Err(SessionError::InvalidDescriptor {
            reason: "metainfo is not a bencoded dictionary",
        });
    }
    if !bytes.windows(6).any(|window| window == b"4:info") {
        return Err(SessionError::InvalidDescriptor {
            reason: "metainfo has no info dictionary",
        });
    }
    Ok(())
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

fn is_hex(value: &str) -> bool {
    value.bytes().all(|byte| byte.is_ascii_hexdigit())
}

fn is_base32(value: &str) -> bool {
    value
        .bytes()
        .all(|byte| matches!(byte.to_ascii_uppercase(), b'A'..=b'Z' | b'2'..=b'7'))
}

mod metainfo_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(|err| D::Error::custom(format!("invalid base64 metainfo: {err}")))
    }
}
