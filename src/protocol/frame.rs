//! Frame demultiplexer: splits raw socket payloads into discrete JSON
//! frames. The feed concatenates frames with a single record-separator
//! control character, and a frame may arrive batched with others or split
//! across socket deliveries.

use serde_json::Value;
use tracing::trace;

/// Delimiter between frames on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Upper bound on the buffered partial frame. A partial that grows past
/// this is discarded rather than held indefinitely.
const MAX_PARTIAL_BYTES: usize = 64 * 1024;

/// Stateful demultiplexer. Holds at most one unterminated trailing segment
/// between deliveries.
#[derive(Debug, Default)]
pub struct FrameDemux {
    partial: String,
}

impl FrameDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw delivery and collect every complete, well-formed frame.
    ///
    /// Empty or whitespace-only segments are skipped. Segments that fail to
    /// parse as JSON are dropped silently; the upstream feed emits heartbeat
    /// and partial artifacts that are not meaningful JSON, and those must
    /// never stop the pipeline.
    pub fn push(&mut self, chunk: &str) -> Vec<Value> {
        let mut frames = Vec::new();
        let combined = if self.partial.is_empty() {
            chunk.to_string()
        } else {
            let mut joined = std::mem::take(&mut self.partial);
            joined.push_str(chunk);
            joined
        };

        let terminated = combined.ends_with(RECORD_SEPARATOR);
        let mut segments: Vec<&str> = combined.split(RECORD_SEPARATOR).collect();
        if !terminated {
            // The final segment is an unterminated partial; keep it for the
            // next delivery.
            if let Some(tail) = segments.pop() {
                if tail.len() <= MAX_PARTIAL_BYTES {
                    self.partial = tail.to_string();
                } else {
                    trace!(
                        target = "pitwall::protocol",
                        bytes = tail.len(),
                        "discarding oversized partial frame"
                    );
                }
            }
        }

        for segment in segments {
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(frame) => frames.push(frame),
                Err(err) => {
                    trace!(
                        target = "pitwall::protocol",
                        error = %err,
                        "dropping malformed frame"
                    );
                }
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RS: char = RECORD_SEPARATOR;

    #[test]
    fn splits_batched_frames() {
        let mut demux = FrameDemux::new();
        let chunk = format!(r#"{{"a":1}}{RS}{{"b":2}}{RS}"#);
        let frames = demux.push(&chunk);
        assert_eq!(frames, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn buffers_frames_split_across_deliveries() {
        let mut demux = FrameDemux::new();
        assert!(demux.push(r#"{"target":"Stre"#).is_empty());
        let frames = demux.push(&format!(r#"aming","arguments":[]}}{RS}"#));
        assert_eq!(frames, vec![json!({"target": "Streaming", "arguments": []})]);
    }

    #[test]
    fn skips_empty_and_whitespace_segments() {
        let mut demux = FrameDemux::new();
        let chunk = format!("{RS}  {RS}\n{RS}{{\"x\":true}}{RS}");
        let frames = demux.push(&chunk);
        assert_eq!(frames, vec![json!({"x": true})]);
    }

    #[test]
    fn drops_garbage_without_failing() {
        let mut demux = FrameDemux::new();
        let chunk = format!("{{\"ok\":1}}{RS}\u{1}\u{2}garbage%%{RS}");
        let frames = demux.push(&chunk);
        assert_eq!(frames, vec![json!({"ok": 1})]);

        // Garbage after a valid delimiter-terminated frame stays buffered
        // until terminated, then drops silently.
        let chunk = format!("{{\"ok\":2}}{RS}@@@@");
        let frames = demux.push(&chunk);
        assert_eq!(frames, vec![json!({"ok": 2})]);
        assert!(demux.push(&RS.to_string()).is_empty());
    }

    #[test]
    fn well_formed_input_is_idempotent_per_frame() {
        let mut demux = FrameDemux::new();
        let chunk = format!("{{\"n\":3}}{RS}");
        let first = demux.push(&chunk);
        let second = demux.push(&chunk);
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_partial_is_discarded() {
        let mut demux = FrameDemux::new();
        let huge = "x".repeat(80 * 1024);
        assert!(demux.push(&huge).is_empty());
        // The discarded partial must not corrupt the next delivery.
        let frames = demux.push(&format!("{{\"y\":4}}{RS}"));
        assert_eq!(frames, vec![json!({"y": 4})]);
    }
}
