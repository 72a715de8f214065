use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use crate::error::{FrameError, Result};
use crate::kind::MessageKind;
use crate::wire::{validate_id, validate_secret, ChunkFrame};

/// Recommended hard ceiling for one slot value, in bytes.
pub const DEFAULT_MAX_SLOT_BYTES: usize = 4000;

/// Minimum number of bytes reserved for the frame header of every chunk.
pub const MIN_FRAME_OVERHEAD: usize = 120;

/// Default maximum size of one transport-encoded message: 8 MiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// Digits needed to print any `u64`, used for the index and total fields.
const POSITION_DIGITS: usize = 20;

/// Configuration for fragmentation and reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Hard ceiling for one slot value. Default: 4000 bytes.
    pub max_slot_bytes: usize,
    /// Bytes reserved for the frame header. Default: 120.
    pub frame_overhead: usize,
    /// Largest transport-encoded message accepted or produced. Default: 8 MiB.
    pub max_message_bytes: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_slot_bytes: DEFAULT_MAX_SLOT_BYTES,
            frame_overhead: MIN_FRAME_OVERHEAD,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl FrameConfig {
    /// Payload bytes that fit in one chunk of the given message.
    ///
    /// The reserved header size is the larger of `frame_overhead` and the
    /// worst-case header for this kind, id and secret, so a chunk can never
    /// push a frame over `max_slot_bytes`.
    pub fn chunk_capacity(
        &self,
        kind: MessageKind,
        id: &str,
        secret: Option<&str>,
    ) -> Result<usize> {
        let reserved = self.frame_overhead.max(header_upper_bound(kind, id, secret));
        if self.max_slot_bytes <= reserved {
            return Err(FrameError::FrameTooLarge {
                size: reserved + 1,
                max: self.max_slot_bytes,
            });
        }
        Ok(self.max_slot_bytes - reserved)
    }

    /// Reject a rendered frame that would exceed the slot ceiling.
    pub fn check_fits(&self, frame: &str) -> Result<()> {
        if frame.len() > self.max_slot_bytes {
            return Err(FrameError::FrameTooLarge {
                size: frame.len(),
                max: self.max_slot_bytes,
            });
        }
        Ok(())
    }
}

fn header_upper_bound(kind: MessageKind, id: &str, secret: Option<&str>) -> usize {
    // MSG:[secret:]KIND:id:index/total:
    "MSG:".len()
        + secret.map_or(0, |secret| secret.len() + 1)
        + kind.tag().len()
        + 1
        + id.len()
        + 1
        + POSITION_DIGITS * 2
        + 1
        + 1
}

/// Serialize a message and apply the transport encoding.
pub fn encode_message(message: &Value) -> Result<String> {
    let json = serde_json::to_vec(message)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Rejoin chunk payloads (in index order) and decode the message.
pub fn decode_message<'a, I>(parts: I) -> Result<Value>
where
    I: IntoIterator<Item = &'a str>,
{
    let encoded: String = parts.into_iter().collect();
    let json = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|err| FrameError::MalformedPayload(format!("transport encoding: {err}")))?;
    serde_json::from_slice(&json).map_err(|err| FrameError::MalformedPayload(format!("json: {err}")))
}

/// Split transport-encoded text into pieces of at most `chunk_size` bytes.
///
/// Always yields at least one piece, so an empty input becomes one empty chunk.
/// The input must be ASCII, which every transport-encoded payload is.
pub fn split_chunks(encoded: &str, chunk_size: usize) -> Vec<String> {
    if encoded.is_empty() {
        return vec![String::new()];
    }
    encoded
        .as_bytes()
        .chunks(chunk_size.max(1))
        .map(|piece| String::from_utf8_lossy(piece).into_owned())
        .collect()
}

/// Encode a message and cut it into ordered chunk frames.
pub fn fragment(
    kind: MessageKind,
    id: &str,
    secret: Option<&str>,
    message: &Value,
    config: &FrameConfig,
) -> Result<Vec<ChunkFrame>> {
    validate_id(id)?;
    if let Some(secret) = secret {
        validate_secret(secret)?;
    }

    let encoded = encode_message(message)?;
    if encoded.len() > config.max_message_bytes {
        return Err(FrameError::MessageTooLarge {
            size: encoded.len(),
            max: config.max_message_bytes,
        });
    }

    let chunk_size = config.chunk_capacity(kind, id, secret)?;
    let pieces = split_chunks(&encoded, chunk_size);
    let total = pieces.len();

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, payload)| ChunkFrame {
            secret: secret.map(str::to_string),
            kind,
            id: id.to_string(),
            index,
            total,
            payload,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::wire::{is_transport_safe, parse_frame, Frame};

    fn small_config(max_slot_bytes: usize) -> FrameConfig {
        FrameConfig {
            max_slot_bytes,
            ..FrameConfig::default()
        }
    }

    #[test]
    fn encoding_uses_transport_alphabet() {
        let message = json!({"text": "ünïcødé ??? >>> ///", "n": [1, 2, 3]});
        let encoded = encode_message(&message).unwrap();

        assert!(is_transport_safe(&encoded));
        assert_eq!(decode_message([encoded.as_str()]).unwrap(), message);
    }

    #[test]
    fn ping_splits_into_three_chunks() {
        // {"op":"ping"} is 13 JSON bytes, 18 base64url characters.
        let config = small_config(MIN_FRAME_OVERHEAD + 7);
        let chunks = fragment(
            MessageKind::Request,
            "req-1",
            None,
            &json!({"op": "ping"}),
            &config,
        )
        .unwrap();

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.total, 3);
            let wire = Frame::Chunk(chunk.clone()).encode();
            assert!(wire.starts_with(&format!("MSG:REQ:req-1:{i}/3:")));
            config.check_fits(&wire).unwrap();
        }
        assert_eq!(chunks[2].payload.len(), 4);
    }

    #[test]
    fn single_chunk_when_message_fits() {
        let chunks = fragment(
            MessageKind::Response,
            "abc",
            Some("secret"),
            &json!({"ok": true}),
            &FrameConfig::default(),
        )
        .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total, 1);
        assert_eq!(chunks[0].secret.as_deref(), Some("secret"));
    }

    #[test]
    fn empty_input_still_yields_one_chunk() {
        assert_eq!(split_chunks("", 10), vec![String::new()]);
        assert_eq!(split_chunks("abcdefg", 3), vec!["abc", "def", "g"]);
    }

    #[test]
    fn chunk_capacity_accounts_for_long_ids_and_secrets() {
        let config = FrameConfig::default();
        let short = config
            .chunk_capacity(MessageKind::Request, "id", None)
            .unwrap();
        assert_eq!(short, DEFAULT_MAX_SLOT_BYTES - MIN_FRAME_OVERHEAD);

        let id = "i".repeat(128);
        let secret = "s".repeat(64);
        let long = config
            .chunk_capacity(MessageKind::Request, &id, Some(&secret))
            .unwrap();
        assert!(long < short);

        let chunk = ChunkFrame {
            secret: Some(secret.clone()),
            kind: MessageKind::Request,
            id: id.clone(),
            index: usize::MAX - 1,
            total: usize::MAX,
            payload: "x".repeat(long),
        };
        config.check_fits(&Frame::Chunk(chunk).encode()).unwrap();
    }

    #[test]
    fn slot_too_small_for_any_payload() {
        let config = small_config(MIN_FRAME_OVERHEAD);
        let err = config
            .chunk_capacity(MessageKind::Request, "id", None)
            .unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn oversized_message_rejected() {
        let config = FrameConfig {
            max_message_bytes: 16,
            ..FrameConfig::default()
        };
        let err = fragment(
            MessageKind::Request,
            "id",
            None,
            &json!({"payload": "x".repeat(64)}),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { .. }));
    }

    #[test]
    fn decode_rejects_bad_encoding_and_bad_json() {
        assert!(matches!(
            decode_message(["@@@"]),
            Err(FrameError::MalformedPayload(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"{not-json");
        assert!(matches!(
            decode_message([not_json.as_str()]),
            Err(FrameError::MalformedPayload(_))
        ));
    }

    #[test]
    fn fragments_parse_back_from_the_wire() {
        let message = json!({"op": "store", "blob": "z".repeat(500)});
        let config = small_config(MIN_FRAME_OVERHEAD + 50);
        let chunks = fragment(MessageKind::Request, "r-9", None, &message, &config).unwrap();

        let parsed: Vec<String> = chunks
            .iter()
            .map(|chunk| match parse_frame(&Frame::Chunk(chunk.clone()).encode()).unwrap() {
                Frame::Chunk(chunk) => chunk.payload,
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();

        assert_eq!(
            decode_message(parsed.iter().map(String::as_str)).unwrap(),
            message
        );
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            ".{0,24}".prop_map(Value::from),
        ]
    }

    fn json_tree() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn split_then_decode_reconstructs_message(message in json_tree(), size in 1usize..64) {
            let encoded = encode_message(&message).unwrap();
            let pieces = split_chunks(&encoded, size);
            prop_assert_eq!(pieces.len(), encoded.len().div_ceil(size).max(1));
            let decoded = decode_message(pieces.iter().map(String::as_str)).unwrap();
            prop_assert_eq!(decoded, message);
        }
    }
}
