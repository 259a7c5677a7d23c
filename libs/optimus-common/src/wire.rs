/// Wire Frames - Judge ⇄ Client Message Codec
///
/// **Inbound frames** (judge → client) are JSON objects. A frame whose
/// `type` field equals `"total"` is a [`TotalResult`]; every other object is
/// decoded as a [`Verdict`].
///
/// **Outbound frames** (client → judge) are internally tagged by `type`.
///
/// Decoding never panics. Callers log and drop frames that fail to decode.

use crate::types::{RunKind, TotalResult, Verdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Discriminating marker carried by total frames
pub const TOTAL_MARKER: &str = "total";

/// Typed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Verdict(Verdict),
    Total(TotalResult),
}

impl InboundMessage {
    /// Track the message is addressed to
    pub fn run_kind(&self) -> RunKind {
        match self {
            InboundMessage::Verdict(v) => v.run_kind(),
            InboundMessage::Total(t) => t.run_kind(),
        }
    }
}

/// Messages the client sends to the judge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Ask the judge to stream results of a submission to this session
    Watch {
        submission_id: u64,
        is_pretest_run: bool,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Syntax(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("invalid {kind} frame: {reason}")]
    Shape { kind: &'static str, reason: String },
}

/// Decode one inbound text frame
pub fn decode_frame(frame: &str) -> Result<InboundMessage, FrameError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| FrameError::Syntax(e.to_string()))?;

    let object = value.as_object().ok_or(FrameError::NotAnObject)?;
    let is_total = object.get("type").and_then(Value::as_str) == Some(TOTAL_MARKER);

    if is_total {
        serde_json::from_value::<TotalResult>(value)
            .map(InboundMessage::Total)
            .map_err(|e| FrameError::Shape {
                kind: "total",
                reason: e.to_string(),
            })
    } else {
        serde_json::from_value::<Verdict>(value)
            .map(InboundMessage::Verdict)
            .map_err(|e| FrameError::Shape {
                kind: "verdict",
                reason: e.to_string(),
            })
    }
}

/// Encode one inbound message in the judge's wire shape
///
/// Used by test harnesses and replay tooling that play the judge's side.
pub fn encode_inbound(message: &InboundMessage) -> serde_json::Result<String> {
    match message {
        InboundMessage::Verdict(v) => serde_json::to_string(v),
        InboundMessage::Total(t) => {
            let mut value = serde_json::to_value(t)?;
            if let Value::Object(map) = &mut value {
                map.insert("type".to_string(), Value::String(TOTAL_MARKER.to_string()));
            }
            serde_json::to_string(&value)
        }
    }
}

pub fn encode_outbound(message: &OutboundMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResultKind;

    #[test]
    fn test_decode_verdict_frame() {
        let frame = r#"{"number":2,"notes":"ok","time":0.15,"memory":2048,"result_id":1,"is_pretest_run":true}"#;
        match decode_frame(frame).unwrap() {
            InboundMessage::Verdict(v) => {
                assert_eq!(v.ordinal, 2);
                assert_eq!(v.result, ResultKind::Accepted);
                assert_eq!(v.memory_kb, 2048);
                assert!((v.time_seconds - 0.15).abs() < f64::EPSILON);
                assert_eq!(v.run_kind(), RunKind::Pretest);
            }
            other => panic!("expected verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_total_frame() {
        let frame = r#"{"type":"total","submission_id":91,"score":80,"result":"Partial","is_pretest_run":false}"#;
        match decode_frame(frame).unwrap() {
            InboundMessage::Total(t) => {
                assert_eq!(t.submission_id, 91);
                assert_eq!(t.score, 80.0);
                assert_eq!(t.result_text, "Partial");
                assert_eq!(t.run_kind(), RunKind::Full);
            }
            other => panic!("expected total, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_falls_back_to_verdict() {
        let frame = r#"{"type":"progress","number":1,"time":0.0,"memory":0,"result_id":2,"is_pretest_run":false}"#;
        assert!(matches!(decode_frame(frame), Ok(InboundMessage::Verdict(_))));
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(decode_frame("not json"), Err(FrameError::Syntax(_))));
        assert!(matches!(decode_frame("[1,2]"), Err(FrameError::NotAnObject)));
        assert!(matches!(
            decode_frame(r#"{"type":"total","score":1}"#),
            Err(FrameError::Shape { kind: "total", .. })
        ));
        assert!(matches!(
            decode_frame(r#"{"number":"one"}"#),
            Err(FrameError::Shape { kind: "verdict", .. })
        ));
    }

    #[test]
    fn test_encoded_total_carries_marker() {
        let total = InboundMessage::Total(TotalResult {
            submission_id: 5,
            score: 100.0,
            result_text: "Accepted".to_string(),
            is_pretest_run: true,
        });
        let frame = encode_inbound(&total).unwrap();
        assert!(frame.contains(r#""type":"total""#));
        assert_eq!(decode_frame(&frame).unwrap(), total);
    }

    #[test]
    fn test_outbound_watch_shape() {
        let frame = encode_outbound(&OutboundMessage::Watch {
            submission_id: 12,
            is_pretest_run: true,
        })
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "watch");
        assert_eq!(value["submission_id"], 12);
    }
}
