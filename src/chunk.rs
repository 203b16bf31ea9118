//! Provider chunk decoding and tool-call assembly.
//!
//! Providers deliver incremental output in loosely-standardized JSON frames.
//! All shape handling lives here, behind a single decode step, so session
//! logic never inspects raw payloads and new provider shapes stay additive.
//!
//! Two frame shapes are recognized:
//! - `{"choices":[{"delta":{"content":..,"tool_calls":..}}]}`
//! - `{"delta":{"text":..,"tool_calls":..}}`
//!
//! Anything else decodes to an empty payload (no content, no tool calls).
//! A recognized frame whose fields fail to decode is malformed and reported
//! as an error; the caller skips the chunk and keeps the session alive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// A recognized frame shape that failed to decode.
#[derive(Debug, Error)]
pub enum ChunkDecodeError {
    #[error("malformed choices frame: {0}")]
    Choices(serde_json::Error),

    #[error("malformed delta frame: {0}")]
    Delta(serde_json::Error),
}

// ============================================================================
// Decoded Payload
// ============================================================================

/// The extracted deltas of one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPayload {
    /// Text delta, if the chunk carried one.
    pub content: Option<String>,
    /// Partial tool-call deltas, in frame order.
    pub tool_calls: Vec<ToolCallDelta>,
}

impl ChunkPayload {
    /// True when the chunk carried neither text nor tool-call data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.tool_calls.is_empty()
    }
}

/// One partial tool-call update, keyed by a provider-supplied slot index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

/// Partial function data inside a tool-call delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ============================================================================
// Wire Frames
// ============================================================================

/// The provider frame shapes the decoder recognizes.
enum WireFrame {
    /// OpenAI-style: `{"choices":[{"delta":{...}}]}`.
    Choices(ChoicesFrame),
    /// Bare-delta style: `{"delta":{"text":...}}`.
    Bare(BareFrame),
    /// Unrecognized shape: no content, no tool calls.
    Opaque,
}

#[derive(Deserialize)]
struct ChoicesFrame {
    choices: Vec<ChoiceFrame>,
}

#[derive(Deserialize)]
struct ChoiceFrame {
    #[serde(default)]
    delta: ChoiceDelta,
}

#[derive(Default, Deserialize)]
struct ChoiceDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct BareFrame {
    delta: BareDelta,
}

#[derive(Deserialize)]
struct BareDelta {
    text: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

fn sniff(raw: &Value) -> Result<WireFrame, ChunkDecodeError> {
    if raw.get("choices").is_some() {
        return ChoicesFrame::deserialize(raw)
            .map(WireFrame::Choices)
            .map_err(ChunkDecodeError::Choices);
    }
    if raw.get("delta").is_some() {
        return BareFrame::deserialize(raw)
            .map(WireFrame::Bare)
            .map_err(ChunkDecodeError::Delta);
    }
    Ok(WireFrame::Opaque)
}

/// Decode one raw provider frame into its deltas.
pub fn decode_chunk(raw: &Value) -> Result<ChunkPayload, ChunkDecodeError> {
    match sniff(raw)? {
        WireFrame::Choices(frame) => {
            let mut payload = ChunkPayload::default();
            for choice in frame.choices {
                if let Some(text) = choice.delta.content {
                    payload.content.get_or_insert_with(String::new).push_str(&text);
                }
                if let Some(deltas) = choice.delta.tool_calls {
                    payload.tool_calls.extend(deltas);
                }
            }
            Ok(payload)
        }
        WireFrame::Bare(frame) => Ok(ChunkPayload {
            content: frame.delta.text,
            tool_calls: frame.delta.tool_calls.unwrap_or_default(),
        }),
        WireFrame::Opaque => Ok(ChunkPayload::default()),
    }
}

// ============================================================================
// Tool Call Assembly
// ============================================================================

/// A tool call assembled incrementally across chunks.
///
/// Tool calls come in pieces: usually the id and name first, then the
/// arguments JSON in fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDraft {
    pub id: String,
    pub name: String,
    /// Concatenated argument fragments; valid JSON only once the stream ends.
    pub arguments: String,
}

/// Merge a batch of deltas into the draft table.
///
/// Slots are keyed by `index` and grow on demand. `arguments` fragments are
/// concatenated in arrival order; `id` and `name` take the last non-empty
/// value seen.
pub fn apply_tool_call_deltas(drafts: &mut Vec<ToolCallDraft>, deltas: &[ToolCallDelta]) {
    for delta in deltas {
        // Ensure we have enough slots
        while drafts.len() <= delta.index {
            drafts.push(ToolCallDraft::default());
        }

        let draft = &mut drafts[delta.index];

        if let Some(ref id) = delta.id {
            if !id.is_empty() {
                draft.id = id.clone();
            }
        }

        if let Some(ref function) = delta.function {
            if let Some(ref name) = function.name {
                if !name.is_empty() {
                    draft.name = name.clone();
                }
            }
            if let Some(ref arguments) = function.arguments {
                draft.arguments.push_str(arguments);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_choices_content() {
        let raw = json!({"choices": [{"delta": {"content": "hello"}}]});
        let payload = decode_chunk(&raw).unwrap();

        assert_eq!(payload.content.as_deref(), Some("hello"));
        assert!(payload.tool_calls.is_empty());
    }

    #[test]
    fn decode_choices_tool_calls() {
        let raw = json!({
            "choices": [{
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "function": {"name": "search", "arguments": "{\"q\":"}
                    }]
                }
            }]
        });
        let payload = decode_chunk(&raw).unwrap();

        assert!(payload.content.is_none());
        assert_eq!(payload.tool_calls.len(), 1);
        assert_eq!(payload.tool_calls[0].index, 0);
        assert_eq!(payload.tool_calls[0].id.as_deref(), Some("call_1"));
    }

    #[test]
    fn decode_bare_delta_text() {
        let raw = json!({"delta": {"text": "world"}});
        let payload = decode_chunk(&raw).unwrap();

        assert_eq!(payload.content.as_deref(), Some("world"));
    }

    #[test]
    fn decode_ignores_extra_fields() {
        let raw = json!({
            "id": "chatcmpl-9",
            "choices": [{"delta": {"content": "x"}, "finish_reason": null}],
            "usage": {"total_tokens": 3}
        });
        let payload = decode_chunk(&raw).unwrap();
        assert_eq!(payload.content.as_deref(), Some("x"));
    }

    #[test]
    fn decode_empty_choices_is_empty_payload() {
        let raw = json!({"choices": []});
        let payload = decode_chunk(&raw).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn decode_unrecognized_shape_is_empty_payload() {
        let raw = json!({"ping": true});
        let payload = decode_chunk(&raw).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn decode_malformed_choices_is_error() {
        let raw = json!({"choices": 42});
        assert!(matches!(
            decode_chunk(&raw),
            Err(ChunkDecodeError::Choices(_))
        ));
    }

    #[test]
    fn decode_malformed_delta_is_error() {
        let raw = json!({"delta": "oops"});
        assert!(matches!(decode_chunk(&raw), Err(ChunkDecodeError::Delta(_))));
    }

    #[test]
    fn deltas_concatenate_arguments() {
        let mut drafts = Vec::new();

        apply_tool_call_deltas(
            &mut drafts,
            &[ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                function: Some(FunctionDelta {
                    name: Some("f".to_string()),
                    arguments: Some("{\"x\":".to_string()),
                }),
            }],
        );
        apply_tool_call_deltas(
            &mut drafts,
            &[ToolCallDelta {
                index: 0,
                id: None,
                function: Some(FunctionDelta {
                    name: None,
                    arguments: Some("1}".to_string()),
                }),
            }],
        );

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, "call_1");
        assert_eq!(drafts[0].name, "f");
        assert_eq!(drafts[0].arguments, "{\"x\":1}");
    }

    #[test]
    fn last_non_empty_name_wins() {
        let mut drafts = Vec::new();

        apply_tool_call_deltas(
            &mut drafts,
            &[ToolCallDelta {
                index: 0,
                id: None,
                function: Some(FunctionDelta {
                    name: Some("first".to_string()),
                    arguments: None,
                }),
            }],
        );
        // Empty name must not clobber the earlier value.
        apply_tool_call_deltas(
            &mut drafts,
            &[ToolCallDelta {
                index: 0,
                id: None,
                function: Some(FunctionDelta {
                    name: Some(String::new()),
                    arguments: None,
                }),
            }],
        );
        apply_tool_call_deltas(
            &mut drafts,
            &[ToolCallDelta {
                index: 0,
                id: None,
                function: Some(FunctionDelta {
                    name: Some("second".to_string()),
                    arguments: None,
                }),
            }],
        );

        assert_eq!(drafts[0].name, "second");
    }

    #[test]
    fn sparse_index_grows_slots() {
        let mut drafts = Vec::new();

        apply_tool_call_deltas(
            &mut drafts,
            &[ToolCallDelta {
                index: 2,
                id: Some("call_3".to_string()),
                function: None,
            }],
        );

        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0], ToolCallDraft::default());
        assert_eq!(drafts[2].id, "call_3");
    }

    #[test]
    fn interleaved_indexes_stay_separate() {
        let mut drafts = Vec::new();

        apply_tool_call_deltas(
            &mut drafts,
            &[
                ToolCallDelta {
                    index: 0,
                    id: Some("a".to_string()),
                    function: Some(FunctionDelta {
                        name: Some("one".to_string()),
                        arguments: Some("{".to_string()),
                    }),
                },
                ToolCallDelta {
                    index: 1,
                    id: Some("b".to_string()),
                    function: Some(FunctionDelta {
                        name: Some("two".to_string()),
                        arguments: Some("[".to_string()),
                    }),
                },
            ],
        );
        apply_tool_call_deltas(
            &mut drafts,
            &[
                ToolCallDelta {
                    index: 0,
                    id: None,
                    function: Some(FunctionDelta {
                        name: None,
                        arguments: Some("}".to_string()),
                    }),
                },
                ToolCallDelta {
                    index: 1,
                    id: None,
                    function: Some(FunctionDelta {
                        name: None,
                        arguments: Some("]".to_string()),
                    }),
                },
            ],
        );

        assert_eq!(drafts[0].arguments, "{}");
        assert_eq!(drafts[1].arguments, "[]");
    }
}
