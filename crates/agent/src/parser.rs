//! Tool-call extraction from model responses.
//!
//! Backends with first-class function calling hand us structured calls and
//! nothing needs parsing. Everything else is instructed to embed calls in
//! its text, either as a fenced block
//!
//! ````text
//! ```tool_call
//! {"tool": "list_repos", "parameters": {}}
//! ```
//! ````
//!
//! or as a bare JSON object of the same shape. The parser pulls those out
//! and returns the remaining prose as narration.

use std::collections::HashSet;
use std::ops::Range;

use forgepilot_core::tool::{ToolCall, ToolParams, ToolRegistry};

/// Fence info strings that always denote a tool call.
const CALL_FENCES: &[&str] = &["tool_call", "tool"];

/// Keys under which models put the argument object.
const PARAM_KEYS: &[&str] = &["parameters", "arguments", "params", "args", "input"];

/// Where the tool calls of a response came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    /// Structured calls from the backend's function-calling facility.
    Native { calls: Vec<ToolCall>, narration: String },
    /// Calls embedded in the response text, with the blocks stripped out.
    FromText { calls: Vec<ToolCall>, narration: String },
    /// No tool calls; the text is a plain narrative turn.
    Plain { text: String },
}

impl ParsedResponse {
    pub fn calls(&self) -> &[ToolCall] {
        match self {
            Self::Native { calls, .. } | Self::FromText { calls, .. } => calls,
            Self::Plain { .. } => &[],
        }
    }

    /// Text to show the user alongside (or instead of) the calls.
    pub fn narration(&self) -> &str {
        match self {
            Self::Native { narration, .. } | Self::FromText { narration, .. } => narration,
            Self::Plain { text } => text,
        }
    }

    pub fn into_parts(self) -> (Vec<ToolCall>, String) {
        match self {
            Self::Native { calls, narration } | Self::FromText { calls, narration } => {
                (calls, narration)
            }
            Self::Plain { text } => (Vec::new(), text),
        }
    }
}

/// Why a text-embedded call was rejected.
enum Rejected {
    /// Not shaped like a tool call at all; leave the text alone.
    NotACall,
    /// Shaped like a call but unusable: bad JSON, unknown tool, bad params.
    Malformed,
}

pub struct ToolCallParser {
    known_tools: HashSet<String>,
}

impl ToolCallParser {
    pub fn new<I, S>(known_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_tools: known_tools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_registry(registry: &ToolRegistry) -> Self {
        Self::new(registry.names())
    }

    /// Classify a response. `native` is whatever structured calls the
    /// backend returned; when present, the text is not inspected.
    pub fn parse(&self, text: &str, native: Vec<ToolCall>) -> ParsedResponse {
        if !native.is_empty() {
            return ParsedResponse::Native {
                calls: native,
                narration: text.trim().to_string(),
            };
        }

        match self.extract(text) {
            Ok((calls, spans)) if !calls.is_empty() => ParsedResponse::FromText {
                calls,
                narration: strip_spans(text, &spans),
            },
            Ok(_) => ParsedResponse::Plain {
                text: text.to_string(),
            },
            Err(()) => {
                tracing::debug!("Malformed tool call in response text, treating as narrative");
                ParsedResponse::Plain {
                    text: text.to_string(),
                }
            }
        }
    }

    /// Find every embedded call and the byte range it occupies.
    fn extract(&self, text: &str) -> Result<(Vec<ToolCall>, Vec<Range<usize>>), ()> {
        let fences = find_fences(text);
        let mut found: Vec<(Range<usize>, ToolCall)> = Vec::new();

        for fence in &fences {
            let strict = CALL_FENCES.contains(&fence.info.as_str());
            match self.calls_from_json(&text[fence.body.clone()]) {
                Ok(calls) => found.extend(calls.into_iter().map(|c| (fence.whole.clone(), c))),
                Err(Rejected::Malformed) => return Err(()),
                Err(Rejected::NotACall) if strict => return Err(()),
                Err(Rejected::NotACall) => {}
            }
        }

        // Bare objects outside any fence
        let mut pos = 0;
        while let Some(offset) = text[pos..].find('{') {
            let start = pos + offset;
            if let Some(fence) = fences.iter().find(|f| f.whole.contains(&start)) {
                pos = fence.whole.end;
                continue;
            }
            let mut stream =
                serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
            match stream.next() {
                Some(Ok(value)) => {
                    let end = start + stream.byte_offset();
                    match self.call_from_value(&value) {
                        Ok(call) => found.push((start..end, call)),
                        Err(Rejected::Malformed) => return Err(()),
                        Err(Rejected::NotACall) => {}
                    }
                    pos = end;
                }
                _ => pos = start + 1,
            }
        }

        found.sort_by_key(|(span, _)| span.start);
        let mut spans: Vec<Range<usize>> = Vec::new();
        let mut calls = Vec::with_capacity(found.len());
        for (span, call) in found {
            if spans.last() != Some(&span) {
                spans.push(span);
            }
            calls.push(call);
        }
        Ok((calls, spans))
    }

    /// A fence body holds one call object or an array of them.
    fn calls_from_json(&self, body: &str) -> Result<Vec<ToolCall>, Rejected> {
        let value: serde_json::Value =
            serde_json::from_str(body.trim()).map_err(|_| Rejected::NotACall)?;
        match value {
            serde_json::Value::Array(items) if !items.is_empty() => {
                items.iter().map(|item| self.call_from_value(item)).collect()
            }
            other => self.call_from_value(&other).map(|call| vec![call]),
        }
    }

    fn call_from_value(&self, value: &serde_json::Value) -> Result<ToolCall, Rejected> {
        let obj = value.as_object().ok_or(Rejected::NotACall)?;
        let param_value = PARAM_KEYS.iter().find_map(|k| obj.get(*k));

        // "tool" alone marks a call; "name" only does with an argument key
        let name = match (obj.get("tool"), obj.get("name"), param_value) {
            (Some(serde_json::Value::String(n)), _, _) => n,
            (None, Some(serde_json::Value::String(n)), Some(_)) => n,
            _ => return Err(Rejected::NotACall),
        };
        if !self.known_tools.contains(name) {
            return Err(Rejected::Malformed);
        }

        let params = match param_value {
            None | Some(serde_json::Value::Null) => ToolParams::new(),
            Some(serde_json::Value::Object(map)) => map.clone(),
            // Some models double-encode the arguments
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => ToolParams::new(),
            Some(serde_json::Value::String(s)) => serde_json::from_str::<ToolParams>(s)
                .map_err(|_| Rejected::Malformed)?,
            Some(_) => return Err(Rejected::Malformed),
        };

        Ok(ToolCall::new(name.clone(), params))
    }
}

struct Fence {
    info: String,
    /// Byte range of the content between the fence lines
    body: Range<usize>,
    /// Byte range including both fence markers
    whole: Range<usize>,
}

fn find_fences(text: &str) -> Vec<Fence> {
    let mut fences = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find("```") {
        let open = pos + offset;
        let info_start = open + 3;
        let Some(line_len) = text[info_start..].find('\n') else {
            break;
        };
        let body_start = info_start + line_len + 1;
        let Some(close_off) = text[body_start..].find("```") else {
            break;
        };
        let close = body_start + close_off;
        fences.push(Fence {
            info: text[info_start..info_start + line_len].trim().to_lowercase(),
            body: body_start..close,
            whole: open..close + 3,
        });
        pos = close + 3;
    }
    fences
}

/// Remove `spans` (sorted, non-overlapping) and tidy the leftover prose.
fn strip_spans(text: &str, spans: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for span in spans {
        out.push_str(&text[pos..span.start]);
        pos = span.end;
    }
    out.push_str(&text[pos..]);

    let mut tidy = String::with_capacity(out.len());
    let mut blank_run = 0;
    for line in out.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        tidy.push_str(line);
        tidy.push('\n');
    }
    tidy.trim().to_string()
}
