//! Live terminal capture.
//!
//! A wrapper process forwards the agent's terminal output here as raw byte
//! chunks. [`OutputCapture`] reassembles lines, recognises one-line usage
//! summaries and status panels, and turns them into the same [`Fact`]s the
//! rollout parser produces (source `stdout`).

pub mod panel;

pub use panel::{parse_compact_number, parse_status_panel, strip_ansi, StatusCapture, StatusPanel};

use crate::types::{overwrite_if_present, CaptureTime, Fact, SessionContext, TokenCountSnapshot, TokenCounts};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

/// Source label stamped on facts from the live terminal.
pub const STDOUT_SOURCE: &str = "stdout";

/// Longest line the assembler buffers before emitting it unterminated.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits a byte stream into lines.
///
/// `\r` counts as a line break. Bytes are held until their line completes,
/// so a chunk boundary inside a multi-byte glyph decodes cleanly. A line
/// reaching [`MAX_LINE_BYTES`] without a break is emitted as is.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_LINE_BYTES {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            }
        }
        lines
    }

    /// Take the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

fn usage_line_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)Token usage:\s*total=(?P<total>[0-9,]+)\s+input=(?P<input>[0-9,]+)(?:\s*\(\+\s*(?P<cached>[0-9,]+)\s+cached\))?\s+output=(?P<output>[0-9,]+)(?:\s*\(reasoning\s+(?P<reasoning>[0-9,]+)\))?",
        )
        .expect("valid usage line regex")
    })
}

/// Parse `Token usage: total=N input=N (+ N cached) output=N (reasoning N)`.
///
/// Missing cached/reasoning parts count as zero.
pub fn parse_usage_line(line: &str) -> Option<TokenCounts> {
    let clean = strip_ansi(line);
    let caps = usage_line_regex().captures(&clean)?;
    let count = |name: &str| -> Option<i64> {
        caps.name(name)
            .and_then(|m| m.as_str().replace(',', "").parse().ok())
    };
    Some(TokenCounts {
        total: count("total"),
        input: count("input"),
        cached_input: Some(count("cached").unwrap_or(0)),
        output: count("output"),
        reasoning_output: Some(count("reasoning").unwrap_or(0)),
    })
}

/// Turns live terminal output into facts.
pub struct OutputCapture {
    tz: Tz,
    lines: LineAssembler,
    status: StatusCapture,
    context: SessionContext,
}

impl OutputCapture {
    /// `directory` is the wrapper's working directory, used until a panel
    /// reports one.
    pub fn new(tz: Tz, directory: Option<&str>) -> Self {
        let mut context = SessionContext::default();
        overwrite_if_present(&mut context.directory, directory);
        Self {
            tz,
            lines: LineAssembler::new(),
            status: StatusCapture::new(),
            context,
        }
    }

    /// Context as refreshed by the panels seen so far.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Feed a chunk captured now.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Fact> {
        self.feed_at(chunk, Utc::now())
    }

    /// Feed a chunk captured at `now`.
    pub fn feed_at(&mut self, chunk: &[u8], now: DateTime<Utc>) -> Vec<Fact> {
        let captured = CaptureTime::new(now, self.tz);
        let mut facts = Vec::new();
        for line in self.lines.push(chunk) {
            self.handle_line(&line, &captured, &mut facts);
        }
        facts
    }

    /// Flush a trailing unterminated line at end of stream.
    pub fn finish_at(&mut self, now: DateTime<Utc>) -> Vec<Fact> {
        let captured = CaptureTime::new(now, self.tz);
        let mut facts = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line, &captured, &mut facts);
        }
        facts
    }

    fn handle_line(&mut self, line: &str, captured: &CaptureTime, facts: &mut Vec<Fact>) {
        if let Some(tokens) = parse_usage_line(line) {
            let mut fact = Fact::Usage(TokenCountSnapshot {
                captured: *captured,
                event_type: "usage_line".to_string(),
                tokens,
                lifetime: TokenCounts::default(),
                context_window: Default::default(),
                short_window: Default::default(),
                long_window: Default::default(),
                credits: Default::default(),
                plan_type: None,
                context: self.context.fact_context(),
            });
            fact.set_source(STDOUT_SOURCE);
            facts.push(fact);
        }

        if let Some(panel) = self.status.feed_line(line) {
            overwrite_if_present(&mut self.context.model, panel.model.as_deref());
            overwrite_if_present(&mut self.context.directory, panel.directory.as_deref());
            overwrite_if_present(&mut self.context.session_id, panel.session_id.as_deref());
            overwrite_if_present(&mut self.context.cli_version, panel.cli_version.as_deref());
            tracing::debug!(session_id = ?self.context.session_id, "Captured status panel");

            let mut fact = Fact::Usage(panel.to_snapshot(*captured, self.context.fact_context()));
            fact.set_source(STDOUT_SOURCE);
            facts.push(fact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_assembler_handles_split_glyph_and_cr() {
        let mut lines = LineAssembler::new();
        let glyph = "\u{256d}".as_bytes();
        assert!(lines.push(&glyph[..1]).is_empty());
        let out = lines.push(&[&glyph[1..], b"x\rnext\n".as_slice()].concat());
        assert_eq!(out, vec!["\u{256d}x".to_string(), "next".to_string()]);
        assert!(lines.finish().is_none());

        lines.push(b"tail");
        assert_eq!(lines.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_assembler_bounds_unterminated_output() {
        let mut lines = LineAssembler::new();
        let chunk = vec![b'x'; 1024 * 1024];
        let out = lines.push(&chunk);
        assert_eq!(out.len(), chunk.len() / MAX_LINE_BYTES);
        assert!(out.iter().all(|line| line.len() == MAX_LINE_BYTES));
        assert!(lines.pending.len() < MAX_LINE_BYTES);

        // A usage line after the flood still parses
        let out = lines.push(b"\nToken usage: total=5 input=4 output=1\n");
        assert_eq!(out.last().and_then(|l| parse_usage_line(l)).and_then(|t| t.total), Some(5));
    }

    #[test]
    fn test_parse_usage_line() {
        let tokens = parse_usage_line(
            "Token usage: total=1,200 input=900 (+ 100 cached) output=300 (reasoning 50)",
        )
        .unwrap();
        assert_eq!(tokens.total, Some(1_200));
        assert_eq!(tokens.input, Some(900));
        assert_eq!(tokens.cached_input, Some(100));
        assert_eq!(tokens.output, Some(300));
        assert_eq!(tokens.reasoning_output, Some(50));

        let bare = parse_usage_line("\x1b[2mToken usage: total=10 input=7 output=3\x1b[0m").unwrap();
        assert_eq!(bare.cached_input, Some(0));
        assert_eq!(bare.reasoning_output, Some(0));

        assert!(parse_usage_line("nothing here").is_none());
    }

    #[test]
    fn test_output_capture_emits_usage_and_panel_facts() {
        let mut capture = OutputCapture::new(chrono_tz::Tz::UTC, Some("/work"));

        let facts = capture.feed_at(b"Token usage: total=10 input=7 output=3\r\n", now());
        assert_eq!(facts.len(), 1);
        let Fact::Usage(usage) = &facts[0] else {
            panic!("expected usage fact");
        };
        assert_eq!(usage.event_type, "usage_line");
        assert_eq!(usage.context.directory.as_deref(), Some("/work"));
        assert_eq!(usage.context.source.as_deref(), Some(STDOUT_SOURCE));

        let panel = "/status\n\u{256d}\u{2500}\u{256e}\n\u{2502} Model: gpt-5 \u{2502}\n\u{2502} Session: s9 \u{2502}\n\u{2502} 5h limit: 75% left \u{2502}\n\u{2570}\u{2500}\u{256f}\n";
        let bytes = panel.as_bytes();
        let (first, second) = bytes.split_at(20);
        assert!(capture.feed_at(first, now()).is_empty());
        let facts = capture.feed_at(second, now());
        assert_eq!(facts.len(), 1);
        let Fact::Usage(status) = &facts[0] else {
            panic!("expected status fact");
        };
        assert_eq!(status.event_type, "status_snapshot");
        assert_eq!(status.context.model.as_deref(), Some("gpt-5"));
        assert_eq!(status.context.session_id.as_deref(), Some("s9"));
        assert_eq!(status.context.directory.as_deref(), Some("/work"));
        assert_eq!(status.short_window.percent_left, Some(75.0));

        assert_eq!(capture.context().session_id.as_deref(), Some("s9"));
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut capture = OutputCapture::new(chrono_tz::Tz::UTC, None);
        assert!(capture
            .feed_at(b"Token usage: total=5 input=4 output=1", now())
            .is_empty());
        assert_eq!(capture.finish_at(now()).len(), 1);
    }
}
