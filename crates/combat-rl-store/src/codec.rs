//! Checksummed text encoding of behavior profiles
//!
//! A stored profile is a small JSON envelope:
//!
//! ```json
//! { "format": "combat-rl-profile", "version": 1, "checksum": "<sha256 hex>", "payload": "<json>" }
//! ```
//!
//! The checksum covers the payload string exactly as stored. Weight and bias
//! arrays inside the payload are written raw, gzip'd, or quantised to 16 bits
//! and gzip'd, depending on [`ProfileCompression`].

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use combat_rl_core::{
    AgentClass, BehaviorProfile, CombatError, LearningMetrics, NetworkArchitecture, Result,
};

/// Format tag written into every document
pub const PROFILE_FORMAT: &str = "combat-rl-profile";

/// Current document version
pub const PROFILE_VERSION: u32 = 1;

/// How parameter arrays are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileCompression {
    /// Plain JSON numbers
    None,
    /// Little-endian f32 bytes, gzip, base64. Bit-identical.
    #[default]
    Gzip,
    /// 16-bit linear quantisation between min and max, gzip, base64.
    /// Error at most (max - min) / 65535 per value.
    QuantizedGzip,
}

/// A parameter array as stored in the payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum WeightBlob {
    /// Uncompressed values
    Raw {
        /// Values
        values: Vec<f32>,
    },
    /// Compressed f32 bytes
    Gzip {
        /// Number of values
        len: usize,
        /// Base64 of the gzip stream
        data: String,
    },
    /// Compressed u16 codes
    QuantizedGzip {
        /// Number of values
        len: usize,
        /// Value mapped to code 0
        min: f32,
        /// Value mapped to code 65535
        max: f32,
        /// Base64 of the gzip stream
        data: String,
    },
}

const QUANT_LEVELS: f32 = 65535.0;

fn gzip(bytes: &[u8]) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

fn gunzip(data: &str) -> Result<Vec<u8>> {
    let compressed = STANDARD
        .decode(data)
        .map_err(|e| CombatError::Profile(format!("invalid base64: {e}")))?;
    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;
    Ok(bytes)
}

impl WeightBlob {
    /// Encode `values` with the given compression
    pub fn encode(values: &[f32], compression: ProfileCompression) -> Result<Self> {
        match compression {
            ProfileCompression::None => Ok(Self::Raw {
                values: values.to_vec(),
            }),
            ProfileCompression::Gzip => {
                let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                Ok(Self::Gzip {
                    len: values.len(),
                    data: gzip(&bytes)?,
                })
            }
            ProfileCompression::QuantizedGzip => {
                let min = values.iter().copied().fold(f32::INFINITY, f32::min);
                let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let (min, max) = if values.is_empty() { (0.0, 0.0) } else { (min, max) };
                let span = max - min;
                let bytes: Vec<u8> = values
                    .iter()
                    .flat_map(|&v| quantize(v, min, span).to_le_bytes())
                    .collect();
                Ok(Self::QuantizedGzip {
                    len: values.len(),
                    min,
                    max,
                    data: gzip(&bytes)?,
                })
            }
        }
    }

    /// Decode back into values
    pub fn decode(&self) -> Result<Vec<f32>> {
        let values = match self {
            Self::Raw { values } => values.clone(),
            Self::Gzip { len, data } => {
                let bytes = gunzip(data)?;
                check_len(bytes.len(), len * 4)?;
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            }
            Self::QuantizedGzip { len, min, max, data } => {
                let bytes = gunzip(data)?;
                check_len(bytes.len(), len * 2)?;
                let span = max - min;
                bytes
                    .chunks_exact(2)
                    .map(|c| min + f32::from(u16::from_le_bytes([c[0], c[1]])) / QUANT_LEVELS * span)
                    .collect()
            }
        };
        Ok(values)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(value: f32, min: f32, span: f32) -> u16 {
    if span <= 0.0 || !span.is_finite() {
        return 0;
    }
    ((value - min) / span * QUANT_LEVELS).round().clamp(0.0, QUANT_LEVELS) as u16
}

fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(CombatError::DimensionMismatch { expected, actual })
    }
}

/// Outer envelope of a stored profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    /// Always [`PROFILE_FORMAT`]
    pub format: String,
    /// Document version
    pub version: u32,
    /// Lowercase hex SHA-256 of `payload`
    pub checksum: String,
    /// JSON of the profile, parameter arrays encoded as [`WeightBlob`]s
    pub payload: String,
}

/// Profile as laid out inside the payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredProfile {
    profile_id: Uuid,
    owner_id: String,
    agent_class: AgentClass,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revision: u64,
    architecture: NetworkArchitecture,
    weights: WeightBlob,
    biases: WeightBlob,
    metrics: LearningMetrics,
}

/// Lowercase hex SHA-256 of `text`
#[must_use]
pub fn checksum(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Encode a profile into a checksummed document.
///
/// The profile is validated first; a structurally broken profile is never
/// written.
pub fn encode_profile(profile: &BehaviorProfile, compression: ProfileCompression) -> Result<String> {
    profile.validate(None, None)?;
    let stored = StoredProfile {
        profile_id: profile.profile_id,
        owner_id: profile.owner_id.clone(),
        agent_class: profile.agent_class,
        created_at: profile.created_at,
        updated_at: profile.updated_at,
        revision: profile.revision,
        architecture: profile.architecture.clone(),
        weights: WeightBlob::encode(&profile.weights, compression)?,
        biases: WeightBlob::encode(&profile.biases, compression)?,
        metrics: profile.metrics.clone(),
    };
    let payload = serde_json::to_string(&stored)?;
    let document = ProfileDocument {
        format: PROFILE_FORMAT.to_string(),
        version: PROFILE_VERSION,
        checksum: checksum(&payload),
        payload,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Decode and verify a document produced by [`encode_profile`].
///
/// Fails on a foreign format, a newer version, a checksum mismatch, or a
/// payload that does not form a structurally valid profile.
pub fn decode_profile(text: &str) -> Result<BehaviorProfile> {
    let document: ProfileDocument = serde_json::from_str(text)?;
    if document.format != PROFILE_FORMAT {
        return Err(CombatError::Profile(format!("unknown format {:?}", document.format)));
    }
    if document.version > PROFILE_VERSION {
        return Err(CombatError::Profile(format!(
            "document version {} is newer than supported {}",
            document.version, PROFILE_VERSION
        )));
    }
    let actual = checksum(&document.payload);
    if actual != document.checksum {
        return Err(CombatError::ChecksumMismatch {
            expected: document.checksum,
            actual,
        });
    }

    let stored: StoredProfile = serde_json::from_str(&document.payload)?;
    let profile = BehaviorProfile {
        profile_id: stored.profile_id,
        owner_id: stored.owner_id,
        agent_class: stored.agent_class,
        created_at: stored.created_at,
        updated_at: stored.updated_at,
        revision: stored.revision,
        architecture: stored.architecture,
        weights: stored.weights.decode()?,
        biases: stored.biases.decode()?,
        metrics: stored.metrics,
    };
    profile.validate(None, None)?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn profile() -> BehaviorProfile {
        let arch = NetworkArchitecture::dense(3, vec![4], 2);
        #[allow(clippy::cast_precision_loss)]
        let weights: Vec<f32> = (0..arch.weight_count()).map(|i| (i as f32 * 0.37).sin()).collect();
        let biases = vec![0.5, -0.25, 1e-7, -3.0, 0.0, 42.0];
        BehaviorProfile::new(AgentClass::Ranged, "archer-7", arch, weights, biases, LearningMetrics::default())
    }

    #[test]
    fn test_lossless_encodings_are_bit_identical() {
        let original = profile();
        for compression in [ProfileCompression::None, ProfileCompression::Gzip] {
            let text = encode_profile(&original, compression).unwrap();
            let loaded = decode_profile(&text).unwrap();
            let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
            assert_eq!(bits(&loaded.weights), bits(&original.weights), "{compression:?}");
            assert_eq!(bits(&loaded.biases), bits(&original.biases), "{compression:?}");
            assert_eq!(loaded.profile_id, original.profile_id);
            assert_eq!(loaded.architecture, original.architecture);
        }
    }

    #[test]
    fn test_quantized_within_tolerance() {
        let original = profile();
        let text = encode_profile(&original, ProfileCompression::QuantizedGzip).unwrap();
        let loaded = decode_profile(&text).unwrap();

        for (values, restored) in [(&original.weights, &loaded.weights), (&original.biases, &loaded.biases)] {
            let min = values.iter().copied().fold(f32::INFINITY, f32::min);
            let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let tolerance = (max - min) / 65535.0 + 1e-6;
            for (a, b) in values.iter().zip(restored.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = tolerance);
            }
        }
    }

    #[test]
    fn test_constant_array_quantizes_exactly() {
        let blob = WeightBlob::encode(&[0.75; 5], ProfileCompression::QuantizedGzip).unwrap();
        assert_eq!(blob.decode().unwrap(), vec![0.75; 5]);
        let empty = WeightBlob::encode(&[], ProfileCompression::QuantizedGzip).unwrap();
        assert!(empty.decode().unwrap().is_empty());
    }

    #[test]
    fn test_tampered_payload_fails_checksum() {
        let text = encode_profile(&profile(), ProfileCompression::None).unwrap();
        let mut document: ProfileDocument = serde_json::from_str(&text).unwrap();
        document.payload = document.payload.replace("archer-7", "archer-8");
        let tampered = serde_json::to_string(&document).unwrap();
        assert!(matches!(
            decode_profile(&tampered),
            Err(CombatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage_and_foreign_documents() {
        assert!(decode_profile("not json").is_err());

        let text = encode_profile(&profile(), ProfileCompression::Gzip).unwrap();
        let mut document: ProfileDocument = serde_json::from_str(&text).unwrap();
        document.version = PROFILE_VERSION + 1;
        assert!(decode_profile(&serde_json::to_string(&document).unwrap()).is_err());

        document.version = PROFILE_VERSION;
        document.format = "something-else".to_string();
        assert!(decode_profile(&serde_json::to_string(&document).unwrap()).is_err());
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let blob = WeightBlob::encode(&[1.0, 2.0, 3.0], ProfileCompression::Gzip).unwrap();
        let WeightBlob::Gzip { data, .. } = blob else {
            panic!("expected gzip blob");
        };
        let wrong = WeightBlob::Gzip { len: 4, data };
        assert!(matches!(wrong.decode(), Err(CombatError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_invalid_profile_is_not_encoded() {
        let mut p = profile();
        p.weights.pop();
        assert!(encode_profile(&p, ProfileCompression::Gzip).is_err());
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
