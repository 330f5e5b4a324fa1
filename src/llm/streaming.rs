//! Streaming sink made explicit: rather than a task-local "current stream
//! handler" like the base crate's manager-mode globals, the sink is an
//! explicit parameter threaded down from the orchestrator through the
//! gateway to each backend.

use std::sync::atomic::{AtomicBool, Ordering};

/// Receives token deltas and exactly one terminal marker per `generate` call,
/// on every exit path (success, failure, or cancellation).
pub trait StreamSink: Send + Sync {
    fn on_delta(&self, delta: &str);
    fn on_terminal(&self, is_final: bool);
}

/// Wraps a caller-supplied sink (if any) with an exactly-once terminal-marker
/// guarantee. Backends call `delta()` freely and rely on `Drop` to emit the
/// terminal marker even on early-return paths.
pub struct TerminalGuard<'a> {
    sink: Option<&'a dyn StreamSink>,
    fired: AtomicBool,
}

impl<'a> TerminalGuard<'a> {
    pub fn new(sink: Option<&'a dyn StreamSink>) -> Self {
        Self {
            sink,
            fired: AtomicBool::new(false),
        }
    }

    pub fn delta(&self, text: &str) {
        if let Some(s) = self.sink {
            s.on_delta(text);
        }
    }

    /// Explicitly fire the terminal marker (idempotent).
    pub fn finish(&self, is_final: bool) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(s) = self.sink {
            s.on_terminal(is_final);
        }
    }
}

impl<'a> Drop for TerminalGuard<'a> {
    fn drop(&mut self) {
        self.finish(true);
    }
}

impl<'a> StreamSink for TerminalGuard<'a> {
    fn on_delta(&self, delta: &str) {
        self.delta(delta);
    }
    fn on_terminal(&self, is_final: bool) {
        self.finish(is_final);
    }
}

/// One incremental content update decoded from a wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Delta(String),
    Done,
    Ignored,
}

/// Parse a single SSE `data: ...` payload (already stripped of the `data: `
/// prefix): try delta, snapshot, `text`, or top-level `content`; tolerate the
/// `[DONE]` sentinel and keep-alive pings.
pub fn parse_sse_payload(payload: &str, previous_snapshot: &mut String) -> Frame {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Frame::Ignored;
    }
    if trimmed == "[DONE]" {
        return Frame::Done;
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            // Raw text after `data:` with no JSON envelope — treat as a raw delta.
            return Frame::Delta(trimmed.to_string());
        }
    };

    if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
        if delta.is_empty() {
            return Frame::Ignored;
        }
        return Frame::Delta(delta.to_string());
    }

    if let Some(snapshot) = value["choices"][0]["message"]["content"].as_str() {
        return diff_against_snapshot(snapshot, previous_snapshot);
    }

    if let Some(text) = value["choices"][0]["text"].as_str() {
        if text.is_empty() {
            return Frame::Ignored;
        }
        return Frame::Delta(text.to_string());
    }

    if let Some(content) = value["content"].as_str() {
        return diff_against_snapshot(content, previous_snapshot);
    }

    Frame::Ignored
}

fn diff_against_snapshot(snapshot: &str, previous: &mut String) -> Frame {
    if snapshot.len() > previous.len() && snapshot.starts_with(previous.as_str()) {
        let delta = snapshot[previous.len()..].to_string();
        *previous = snapshot.to_string();
        if delta.is_empty() {
            Frame::Ignored
        } else {
            Frame::Delta(delta)
        }
    } else if snapshot != previous.as_str() {
        // Snapshot diverged from what we tracked (e.g. first frame) — emit it whole.
        let delta = snapshot.to_string();
        *previous = snapshot.to_string();
        Frame::Delta(delta)
    } else {
        Frame::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        deltas: Mutex<Vec<String>>,
        terminal_calls: Mutex<Vec<bool>>,
    }

    impl StreamSink for RecordingSink {
        fn on_delta(&self, delta: &str) {
            self.deltas.lock().unwrap().push(delta.to_string());
        }
        fn on_terminal(&self, is_final: bool) {
            self.terminal_calls.lock().unwrap().push(is_final);
        }
    }

    #[test]
    fn terminal_guard_fires_exactly_once_on_drop() {
        let sink = RecordingSink {
            deltas: Mutex::new(vec![]),
            terminal_calls: Mutex::new(vec![]),
        };
        {
            let guard = TerminalGuard::new(Some(&sink));
            guard.delta("hello");
        }
        assert_eq!(*sink.terminal_calls.lock().unwrap(), vec![true]);
    }

    #[test]
    fn terminal_guard_explicit_finish_then_drop_fires_once() {
        let sink = RecordingSink {
            deltas: Mutex::new(vec![]),
            terminal_calls: Mutex::new(vec![]),
        };
        {
            let guard = TerminalGuard::new(Some(&sink));
            guard.finish(false);
        }
        assert_eq!(sink.terminal_calls.lock().unwrap().len(), 1);
        assert_eq!(sink.terminal_calls.lock().unwrap()[0], false);
    }

    #[test]
    fn parses_delta_frame() {
        let mut prev = String::new();
        let frame = parse_sse_payload(r#"{"choices":[{"delta":{"content":"hi"}}]}"#, &mut prev);
        assert_eq!(frame, Frame::Delta("hi".to_string()));
    }

    #[test]
    fn done_sentinel_recognized() {
        let mut prev = String::new();
        assert_eq!(parse_sse_payload("[DONE]", &mut prev), Frame::Done);
    }

    #[test]
    fn snapshot_frame_computes_prefix_diff() {
        let mut prev = String::new();
        let f1 = parse_sse_payload(r#"{"choices":[{"message":{"content":"The "}}]}"#, &mut prev);
        assert_eq!(f1, Frame::Delta("The ".to_string()));
        let f2 = parse_sse_payload(
            r#"{"choices":[{"message":{"content":"The cat"}}]}"#,
            &mut prev,
        );
        assert_eq!(f2, Frame::Delta("cat".to_string()));
    }

    #[test]
    fn keep_alive_ping_ignored() {
        let mut prev = String::new();
        let frame = parse_sse_payload("{}", &mut prev);
        assert_eq!(frame, Frame::Ignored);
    }

    #[test]
    fn raw_text_after_data_prefix_treated_as_delta() {
        let mut prev = String::new();
        let frame = parse_sse_payload("just some raw text", &mut prev);
        assert_eq!(frame, Frame::Delta("just some raw text".to_string()));
    }
}
