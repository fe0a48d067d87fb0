//! Status-panel capture.
//!
//! The agent's terminal UI prints a boxed panel in response to `/status`:
//!
//! ```text
//! ╭──────────────────────────────────────────────╮
//! │ OpenAI Codex (v0.10.0)                       │
//! │ Model: gpt-5.1-codex                         │
//! │ Directory: /tmp/project                      │
//! │ Session: session-1                           │
//! │ Token usage: 12.3K total (10K input + 2.3K output)
//! │ Context window: 70% left (8K used / 28K)     │
//! │ 5h limit: [####] 80% left (resets 14:00)     │
//! │ Weekly limit: 90% left (resets 14:00 on 16 Jan)
//! ╰──────────────────────────────────────────────╯
//! ```
//!
//! [`StatusCapture`] watches live lines for the trigger, buffers the box and
//! hands the block to [`parse_status_panel`].

use crate::ingest::{context_percent_left, percent_left};
use crate::types::{
    CaptureTime, ContextUsage, FactContext, RateLimitWindow, TokenCountSnapshot, TokenCounts,
};
use regex::Regex;
use std::sync::OnceLock;

/// Substring that arms the capture.
pub const STATUS_TRIGGER: &str = "/status";
/// Upper bound on buffered lines for a panel that never closes.
pub const MAX_PANEL_LINES: usize = 200;

const BOX_TOP_LEFT: char = '\u{256d}';
const BOX_BOTTOM_LEFT: char = '\u{2570}';
const BOX_SIDE: char = '\u{2502}';

/// One rate-limit row of a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitRow {
    /// Lowercased label, e.g. `5h limit`
    pub label: String,
    pub percent_left: Option<i64>,
    pub resets: Option<String>,
}

/// Everything read from one status panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPanel {
    pub model: Option<String>,
    pub directory: Option<String>,
    pub session_id: Option<String>,
    pub cli_version: Option<String>,
    /// total / input / output as printed
    pub token_usage: Option<TokenCounts>,
    /// used / window / percent-left as printed
    pub context_window: Option<ContextUsage>,
    pub limits: Vec<LimitRow>,
}

impl StatusPanel {
    /// The 5-hour window row, if present.
    pub fn short_window(&self) -> Option<&LimitRow> {
        self.limits
            .iter()
            .find(|row| row.label.contains("5h") || row.label.contains("5 h"))
    }

    /// The weekly window row, if present.
    pub fn long_window(&self) -> Option<&LimitRow> {
        self.limits
            .iter()
            .filter(|row| !(row.label.contains("5h") || row.label.contains("5 h")))
            .find(|row| row.label.contains("week"))
    }

    /// Convert into a `status_snapshot` usage fact.
    pub fn to_snapshot(&self, captured: CaptureTime, context: FactContext) -> TokenCountSnapshot {
        let mut context_window = self.context_window.unwrap_or_default();
        if context_window.used.is_some() && context_window.window.is_some() {
            context_window.percent_left =
                context_percent_left(context_window.used, context_window.window);
        }

        TokenCountSnapshot {
            captured,
            event_type: "status_snapshot".to_string(),
            tokens: self.token_usage.unwrap_or_default(),
            lifetime: TokenCounts::default(),
            context_window,
            short_window: limit_window(self.short_window()),
            long_window: limit_window(self.long_window()),
            credits: Default::default(),
            plan_type: None,
            context,
        }
    }
}

fn limit_window(row: Option<&LimitRow>) -> RateLimitWindow {
    let Some(row) = row else {
        return RateLimitWindow::default();
    };
    let used_percent = row.percent_left.map(|left| 100.0 - left as f64);
    RateLimitWindow {
        used_percent,
        percent_left: percent_left(used_percent),
        window_minutes: None,
        resets_at: None,
        resets_text: row.resets.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CaptureState {
    Idle,
    AwaitingBox,
    CapturingBox(Vec<String>),
}

/// Line-driven state machine that extracts status panels from terminal output.
#[derive(Debug)]
pub struct StatusCapture {
    state: CaptureState,
    max_lines: usize,
}

impl Default for StatusCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCapture {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            max_lines: MAX_PANEL_LINES,
        }
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    /// True while a panel is being buffered.
    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::CapturingBox(_))
    }

    /// Feed one terminal line; returns a panel when one completes.
    pub fn feed_line(&mut self, line: &str) -> Option<StatusPanel> {
        let clean = strip_ansi(line);

        if matches!(self.state, CaptureState::Idle) && clean.contains(STATUS_TRIGGER) {
            self.state = CaptureState::AwaitingBox;
        }

        match &mut self.state {
            CaptureState::Idle => None,
            CaptureState::AwaitingBox => {
                if clean.contains(BOX_TOP_LEFT) {
                    self.state = CaptureState::CapturingBox(vec![line.to_string()]);
                }
                None
            }
            CaptureState::CapturingBox(buffer) => {
                buffer.push(line.to_string());
                let closed = clean.contains(BOX_BOTTOM_LEFT);
                if !closed && buffer.len() < self.max_lines {
                    return None;
                }
                if !closed {
                    tracing::debug!(lines = buffer.len(), "Status panel never closed, parsing anyway");
                }
                let panel = parse_status_panel(&buffer.join("\n"));
                self.state = CaptureState::Idle;
                Some(panel)
            }
        }
    }
}

fn ansi_regexes() -> &'static [Regex; 2] {
    static REGEXES: OnceLock<[Regex; 2]> = OnceLock::new();
    REGEXES.get_or_init(|| {
        [
            Regex::new(r"\x1b\][^\x07]*\x07").expect("valid osc regex"),
            Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid csi regex"),
        ]
    })
}

struct PanelRegexes {
    version: Regex,
    token_usage: Regex,
    context: Regex,
    limit: Regex,
    reset: Regex,
}

fn panel_regexes() -> &'static PanelRegexes {
    static REGEXES: OnceLock<PanelRegexes> = OnceLock::new();
    REGEXES.get_or_init(|| PanelRegexes {
        version: Regex::new(r"(?i)OpenAI Codex\s*\(v(?P<version>[^)]+)\)")
            .expect("valid version regex"),
        token_usage: Regex::new(
            r"(?i)Token usage:\s*(?P<total>[0-9.,]+[KMB]?)\s*total\s*\(\s*(?P<input>[0-9.,]+[KMB]?)\s*input\s*\+\s*(?P<output>[0-9.,]+[KMB]?)\s*output\s*\)",
        )
        .expect("valid token usage regex"),
        context: Regex::new(
            r"(?i)Context window:\s*(?P<percent>[0-9]+)%\s*left\s*\(\s*(?P<used>[0-9.,]+[KMB]?)\s*used\s*/\s*(?P<total>[0-9.,]+[KMB]?)\s*\)",
        )
        .expect("valid context regex"),
        limit: Regex::new(
            r"(?i)^(?P<label>.+?limit):\s*(?:\[[^\]]*\]\s*)?(?P<percent>[0-9]+)%\s*left(?:\s*\(resets\s+(?P<resets>[^)]+)\))?",
        )
        .expect("valid limit regex"),
        reset: Regex::new(r"(?i)\(resets\s+(?P<resets>[^)]+)\)").expect("valid reset regex"),
    })
}

/// Remove OSC and CSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    let [osc, csi] = ansi_regexes();
    let without_osc = osc.replace_all(text, "");
    csi.replace_all(&without_osc, "").into_owned()
}

/// Strip escapes and the box's side borders.
fn clean_panel_line(line: &str) -> String {
    let stripped = strip_ansi(line).replace('\r', "");
    stripped
        .trim()
        .trim_start_matches(|c| c == BOX_SIDE || c == '|')
        .trim_end_matches(|c| c == BOX_SIDE || c == '|')
        .trim()
        .to_string()
}

/// Parse a compact count such as `12.3K`, `1,024` or `2M`.
pub fn parse_compact_number(value: &str) -> Option<i64> {
    let value = value.trim().replace(',', "");
    let multiplier = match value.chars().last()?.to_ascii_uppercase() {
        'K' => 1e3,
        'M' => 1e6,
        'B' => 1e9,
        _ => 1.0,
    };
    let digits = if multiplier > 1.0 {
        &value[..value.len() - 1]
    } else {
        value.as_str()
    };
    let number: f64 = digits.parse().ok()?;
    Some((number * multiplier).round() as i64)
}

/// Text after the first `:`, trimmed.
fn field_value(line: &str, key: &str) -> Option<String> {
    let (head, tail) = line.split_once(':')?;
    if !head.trim().eq_ignore_ascii_case(key) {
        return None;
    }
    let value = tail.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a buffered status panel.
///
/// A `(resets ...)` fragment on its own line belongs to the limit row above it.
pub fn parse_status_panel(text: &str) -> StatusPanel {
    let re = panel_regexes();
    let mut panel = StatusPanel::default();
    let mut last_limit: Option<usize> = None;

    for raw in text.lines() {
        let line = clean_panel_line(raw);
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = re.version.captures(&line) {
            panel.cli_version = Some(caps["version"].trim().to_string());
            continue;
        }
        if let Some(model) = field_value(&line, "model") {
            panel.model = Some(model);
            continue;
        }
        if let Some(directory) = field_value(&line, "directory") {
            panel.directory = Some(directory);
            continue;
        }
        if let Some(session) = field_value(&line, "session") {
            panel.session_id = Some(session);
            continue;
        }

        if let Some(caps) = re.token_usage.captures(&line) {
            panel.token_usage = Some(TokenCounts {
                total: parse_compact_number(&caps["total"]),
                input: parse_compact_number(&caps["input"]),
                output: parse_compact_number(&caps["output"]),
                ..Default::default()
            });
            continue;
        }

        if let Some(caps) = re.context.captures(&line) {
            panel.context_window = Some(ContextUsage {
                used: parse_compact_number(&caps["used"]),
                window: parse_compact_number(&caps["total"]),
                percent_left: caps["percent"].parse().ok(),
            });
            continue;
        }

        if let Some(caps) = re.limit.captures(&line) {
            let row = LimitRow {
                label: caps["label"].trim().to_lowercase(),
                percent_left: caps["percent"].parse().ok(),
                resets: caps.name("resets").map(|m| m.as_str().trim().to_string()),
            };
            match panel.limits.iter().position(|r| r.label == row.label) {
                Some(i) => {
                    panel.limits[i] = row;
                    last_limit = Some(i);
                }
                None => {
                    panel.limits.push(row);
                    last_limit = Some(panel.limits.len() - 1);
                }
            }
            continue;
        }

        if let (Some(caps), Some(i)) = (re.reset.captures(&line), last_limit) {
            panel.limits[i].resets = Some(caps["resets"].trim().to_string());
        }
    }

    panel
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_panel_lines() -> Vec<&'static str> {
        vec![
            "/status",
            "\u{256d}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{256e}",
            "\u{2502} OpenAI Codex (v0.10.0)   \u{2502}",
            "\u{2502} Model: gpt-5.1-codex     \u{2502}",
            "\u{2502} Directory: /tmp/project  \u{2502}",
            "\u{2502} Session: session-1       \u{2502}",
            "\u{2502} Token usage: 12.3K total (10K input + 2.3K output) \u{2502}",
            "\u{2502} Context window: 70% left (8K used / 28K) \u{2502}",
            "\u{2502} 5h limit: [####] 80% left (resets 14:00) \u{2502}",
            "\u{2502} Weekly limit: 90% left (resets 14:00 on 16 Jan) \u{2502}",
            "\u{2570}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{256f}",
        ]
    }

    #[test]
    fn test_capture_emits_panel_on_close() {
        let mut capture = StatusCapture::new();
        let mut panels = Vec::new();
        for line in sample_panel_lines() {
            if let Some(panel) = capture.feed_line(line) {
                panels.push(panel);
            }
        }
        assert_eq!(panels.len(), 1);
        assert!(!capture.is_capturing());

        let panel = &panels[0];
        assert_eq!(panel.cli_version.as_deref(), Some("0.10.0"));
        assert_eq!(panel.model.as_deref(), Some("gpt-5.1-codex"));
        assert_eq!(panel.directory.as_deref(), Some("/tmp/project"));
        assert_eq!(panel.session_id.as_deref(), Some("session-1"));

        let tokens = panel.token_usage.unwrap();
        assert_eq!(tokens.total, Some(12_300));
        assert_eq!(tokens.input, Some(10_000));
        assert_eq!(tokens.output, Some(2_300));

        let context = panel.context_window.unwrap();
        assert_eq!(context.percent_left, Some(70));
        assert_eq!(context.used, Some(8_000));
        assert_eq!(context.window, Some(28_000));

        assert_eq!(panel.short_window().unwrap().label, "5h limit");
        assert_eq!(panel.long_window().unwrap().label, "weekly limit");
    }

    #[test]
    fn test_box_without_trigger_is_ignored() {
        let mut capture = StatusCapture::new();
        for line in sample_panel_lines().into_iter().skip(1) {
            assert!(capture.feed_line(line).is_none());
        }
    }

    #[test]
    fn test_unclosed_panel_is_capped() {
        let mut capture = StatusCapture::new().with_max_lines(4);
        assert!(capture.feed_line("\x1b[1m/status\x1b[0m").is_none());
        assert!(capture.feed_line("\u{256d}\u{2500}\u{256e}").is_none());
        assert!(capture.feed_line("\u{2502} Model: m \u{2502}").is_none());
        assert!(capture.feed_line("\u{2502} Session: s \u{2502}").is_none());
        let panel = capture.feed_line("\u{2502} still going").unwrap();
        assert_eq!(panel.model.as_deref(), Some("m"));
        assert_eq!(panel.session_id.as_deref(), Some("s"));
        assert!(!capture.is_capturing());
    }

    #[test]
    fn test_parse_panel_with_wrapped_reset() {
        let panel = parse_status_panel(
            &[
                "\u{256d}\u{2500}\u{2500}\u{2500}\u{256e}",
                "\u{2502}  OpenAI Codex (v0.10.2) \u{2502}",
                "\u{2502}  Model: gpt-5.1 (fast) \u{2502}",
                "\u{2502}  Directory: ~/proj \u{2502}",
                "\u{2502}  Token usage: 1.9K total (1K input + 900 output) \u{2502}",
                "\u{2502}  Context window: 61% left (108K used / 258K) \u{2502}",
                "\u{2502}  5h limit: [\u{2588}\u{2588}\u{2591}] 12% left (resets 18:34) \u{2502}",
                "\u{2502}  Weekly limit: [\u{2588}\u{2588}] 80% left \u{2502}",
                "\u{2502}    (resets 12:00 on 16 Jan) \u{2502}",
                "\u{2570}\u{2500}\u{2500}\u{2500}\u{256f}",
            ]
            .join("\n"),
        );

        assert_eq!(panel.cli_version.as_deref(), Some("0.10.2"));
        assert_eq!(panel.model.as_deref(), Some("gpt-5.1 (fast)"));
        assert_eq!(panel.directory.as_deref(), Some("~/proj"));
        assert_eq!(panel.token_usage.unwrap().total, Some(1_900));
        assert_eq!(panel.token_usage.unwrap().output, Some(900));
        assert_eq!(panel.context_window.unwrap().window, Some(258_000));

        let short = panel.short_window().unwrap();
        assert_eq!(short.percent_left, Some(12));
        assert_eq!(short.resets.as_deref(), Some("18:34"));
        let long = panel.long_window().unwrap();
        assert_eq!(long.percent_left, Some(80));
        assert_eq!(long.resets.as_deref(), Some("12:00 on 16 Jan"));
    }

    #[test]
    fn test_compact_numbers() {
        assert_eq!(parse_compact_number("12.3K"), Some(12_300));
        assert_eq!(parse_compact_number("1,024"), Some(1_024));
        assert_eq!(parse_compact_number("2m"), Some(2_000_000));
        assert_eq!(parse_compact_number("1.5B"), Some(1_500_000_000));
        assert_eq!(parse_compact_number(""), None);
        assert_eq!(parse_compact_number("K"), None);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b]0;title\x07\x1b[32mok\x1b[0m"), "ok");
        assert_eq!(strip_ansi("\x1b[?25lplain"), "plain");
    }

    #[test]
    fn test_snapshot_maps_limits_and_derives_context() {
        let panel = StatusPanel {
            context_window: Some(ContextUsage {
                used: Some(62_000),
                window: Some(112_000),
                percent_left: Some(1),
            }),
            limits: vec![
                LimitRow {
                    label: "weekly limit".to_string(),
                    percent_left: Some(90),
                    resets: Some("14:00 on 16 Jan".to_string()),
                },
                LimitRow {
                    label: "5h limit".to_string(),
                    percent_left: Some(80),
                    resets: None,
                },
            ],
            ..Default::default()
        };
        let captured = CaptureTime::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
            chrono_tz::Tz::UTC,
        );
        let snapshot = panel.to_snapshot(captured, FactContext::default());

        assert_eq!(snapshot.event_type, "status_snapshot");
        assert_eq!(snapshot.context_window.percent_left, Some(50));
        assert_eq!(snapshot.short_window.percent_left, Some(80.0));
        assert_eq!(snapshot.short_window.used_percent, Some(20.0));
        assert_eq!(snapshot.long_window.percent_left, Some(90.0));
        assert_eq!(
            snapshot.long_window.resets_text.as_deref(),
            Some("14:00 on 16 Jan")
        );
    }
}
