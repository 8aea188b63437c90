use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);

    pub fn is_supported(&self) -> bool {
        self.0 <= CURRENT_PROTOCOL_VERSION
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct VersionVisitor;

        impl<'de> Visitor<'de> for VersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u16::try_from(value)
                    .map(ProtocolVersion)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let value = u64::try_from(value).map_err(|_| {
                    E::custom(format!("protocol version cannot be negative: {value}"))
                })?;
                self.visit_u64(value)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                cleaned
                    .parse::<u16>()
                    .map(ProtocolVersion)
                    .map_err(|err| E::custom(format!("invalid protocol version '{value}': {err}")))
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

/// Closed set of message kinds one side of the link understands. Used to
/// tell an unknown `type` apart from a malformed payload of a known one.
pub trait WireKind {
    const KINDS: &'static [&'static str];

    fn kind(&self) -> &'static str;

    fn is_known(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }
}

/// One NDJSON frame. `M` is `InboundEvent` for frames coming from the
/// workers and `OutboundCommand` for frames going to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope<M> {
    #[serde(default)]
    pub version: ProtocolVersion,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub msg: M,
}

impl<M> WireEnvelope<M> {
    pub fn new(sender_id: impl Into<String>, msg: M) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            sender_id: sender_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: None,
            msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("unknown event kind '{0}'")]
    UnknownEvent(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<M>(bytes: &[u8], max_frame_bytes: usize) -> Result<WireEnvelope<M>, FrameError>
where
    M: WireKind + DeserializeOwned,
{
    let raw = trim_line_ending(bytes);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    parse_envelope(raw)
}

fn trim_line_ending(bytes: &[u8]) -> &[u8] {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    raw
}

#[derive(Deserialize)]
struct KindTag {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

fn parse_envelope<M>(raw: &[u8]) -> Result<WireEnvelope<M>, FrameError>
where
    M: WireKind + DeserializeOwned,
{
    match serde_json::from_slice::<WireEnvelope<M>>(raw) {
        Ok(envelope) => Ok(envelope),
        Err(err) => {
            if let Ok(KindTag { kind: Some(kind) }) = serde_json::from_slice::<KindTag>(raw) {
                if !M::is_known(&kind) {
                    return Err(FrameError::UnknownEvent(kind));
                }
            }
            Err(FrameError::Decode(err.to_string()))
        }
    }
}

pub struct NdjsonFrameDecoder<M> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    marker: PhantomData<M>,
}

impl<M> NdjsonFrameDecoder<M> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<M> Default for NdjsonFrameDecoder<M> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<M: WireKind + DeserializeOwned> NdjsonFrameDecoder<M> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<WireEnvelope<M>> {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            let frame = trim_line_ending(&line);
            if frame.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            self.decode_raw_frame(frame, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
        }

        report
    }

    /// Decodes whatever is left once the peer closed without a final newline.
    pub fn finish(&mut self) -> DecodeReport<WireEnvelope<M>> {
        let mut report = DecodeReport::default();
        let tail = std::mem::take(&mut self.pending);
        if !tail.iter().all(|b| b.is_ascii_whitespace()) {
            self.decode_raw_frame(&tail, &mut report);
        }
        report
    }

    fn decode_raw_frame(&self, frame: &[u8], report: &mut DecodeReport<WireEnvelope<M>>) {
        if frame.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedFrame {
                size: frame.len(),
                max: self.max_frame_bytes,
            });
            return;
        }
        match parse_envelope(frame) {
            Ok(envelope) => report.frames.push(envelope),
            Err(err) => report.errors.push(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{OutboundCommand, StartProcessingPayload};
    use crate::event::{BatchRef, InboundEvent, ProgressPayload};
    use crate::status::StatusToken;

    fn progress_frame(current: u64) -> WireEnvelope<InboundEvent> {
        WireEnvelope {
            version: ProtocolVersion::CURRENT,
            sender_id: "worker-hub".to_string(),
            timestamp: "2025-03-01T09:00:00Z".to_string(),
            request_id: None,
            msg: InboundEvent::ProcessingProgress(ProgressPayload {
                batch_id: Some("B1".to_string()),
                current: Some(current),
                total: Some(10),
                status: Some(StatusToken::Processing),
                message: Some(format!("record {current}")),
                ..ProgressPayload::default()
            }),
        }
    }

    #[test]
    fn inbound_frame_uses_named_type_and_camel_case_payload() {
        let frame = encode_frame(&progress_frame(3), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let value: serde_json::Value =
            serde_json::from_slice(&frame[..frame.len() - 1]).expect("json");
        assert_eq!(value["type"], "processing_progress");
        assert_eq!(value["payload"]["batchId"], "B1");
        assert_eq!(value["payload"]["current"], 3);
        assert_eq!(value["version"], 1);
    }

    #[test]
    fn outbound_start_command_matches_worker_contract() {
        let envelope = WireEnvelope::new(
            "client-1",
            OutboundCommand::StartTaqeemProcessing(StartProcessingPayload::new(
                "B1",
                vec!["r1".to_string(), "r2".to_string()],
                4,
            )),
        );
        let frame = encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let value: serde_json::Value =
            serde_json::from_slice(&frame[..frame.len() - 1]).expect("json");
        assert_eq!(value["type"], "start_taqeem_processing");
        assert_eq!(value["payload"]["numTabs"], 4);
        assert_eq!(value["payload"]["actionType"], "process");
        assert_eq!(value["payload"]["reportIds"][1], "r2");
    }

    #[test]
    fn decoder_recovers_after_malformed_json_line() {
        let mut chunk = encode_frame(&progress_frame(1), DEFAULT_MAX_FRAME_BYTES).expect("a");
        chunk.extend_from_slice(b"{\"type\":\"processing_progress\"\n");
        chunk.extend(encode_frame(&progress_frame(2), DEFAULT_MAX_FRAME_BYTES).expect("b"));

        let mut decoder = NdjsonFrameDecoder::<InboundEvent>::default();
        let report = decoder.push_chunk(&chunk);
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], FrameError::Decode(_)));
    }

    #[test]
    fn decoder_joins_frames_split_across_chunks() {
        let frame = encode_frame(&progress_frame(7), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let (head, tail) = frame.split_at(frame.len() / 2);

        let mut decoder = NdjsonFrameDecoder::<InboundEvent>::default();
        assert!(decoder.push_chunk(head).frames.is_empty());
        let report = decoder.push_chunk(tail);
        assert_eq!(report.frames, vec![progress_frame(7)]);
    }

    #[test]
    fn unknown_event_kind_is_reported_not_merged() {
        let raw = br#"{"type":"processing_teleported","payload":{"batchId":"B1"}}"#;
        let result = decode_frame::<InboundEvent>(raw, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(
            result,
            Err(FrameError::UnknownEvent("processing_teleported".to_string()))
        );
    }

    #[test]
    fn known_kind_missing_required_field_is_a_decode_error() {
        let raw = br#"{"type":"processing_paused","payload":{}}"#;
        let result = decode_frame::<InboundEvent>(raw, DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let envelope = WireEnvelope::new(
            "client-1",
            OutboundCommand::StartTaqeemProcessing(StartProcessingPayload::new(
                "B1",
                (0..64).map(|i| format!("report-{i}")).collect(),
                2,
            )),
        );
        let result = encode_frame(&envelope, 128);
        assert!(matches!(result, Err(FrameError::OversizedFrame { .. })));
    }

    #[test]
    fn decoder_rejects_oversized_line_and_continues() {
        let mut chunk = format!("{{\"blob\":\"{}\"}}\n", "x".repeat(2_000)).into_bytes();
        chunk.extend(encode_frame(&progress_frame(4), DEFAULT_MAX_FRAME_BYTES).expect("encode"));

        let mut decoder = NdjsonFrameDecoder::<InboundEvent>::new(1_024);
        let report = decoder.push_chunk(&chunk);
        assert_eq!(report.frames.len(), 1);
        assert!(matches!(
            report.errors[..],
            [FrameError::OversizedFrame { .. }]
        ));
    }

    #[test]
    fn version_field_accepts_string_number_and_missing() {
        for (raw, expected) in [
            (r#"{"version":"v1","type":"processing_paused","payload":{"batchId":"B1"}}"#, 1),
            (r#"{"version":2,"type":"processing_paused","payload":{"batchId":"B1"}}"#, 2),
            (r#"{"type":"processing_paused","payload":{"batchId":"B1"}}"#, 1),
        ] {
            let envelope =
                decode_frame::<InboundEvent>(raw.as_bytes(), DEFAULT_MAX_FRAME_BYTES).expect(raw);
            assert_eq!(envelope.version, ProtocolVersion(expected));
            assert_eq!(
                envelope.msg,
                InboundEvent::ProcessingPaused(BatchRef::new("B1"))
            );
        }
        assert!(!ProtocolVersion(2).is_supported());
    }

    #[test]
    fn finish_decodes_trailing_frame_without_newline() {
        let mut decoder = NdjsonFrameDecoder::<InboundEvent>::default();
        let raw = br#"{"type":"processing_stopped","payload":{"batchId":7}}"#;
        assert!(decoder.push_chunk(raw).frames.is_empty());
        let report = decoder.finish();
        assert_eq!(report.frames.len(), 1);
        assert_eq!(report.frames[0].msg.kind(), "processing_stopped");
    }
}
