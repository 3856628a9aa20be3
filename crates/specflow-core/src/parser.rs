//! Markdown task-file parsing.
//!
//! A task file looks like:
//!
//! ```text
//! ### T001: Set up project
//!
//! - [x] Create workspace
//! **Status:** COMPLETED
//!
//! ---
//! <!-- task-metadata -->
//! - **Last Updated:** 2026-01-01T00:00:00Z
//! - **State:** COMPLETED
//! <!-- /task-metadata -->
//! ```
//!
//! The first checkbox is the primary marker. The metadata footer is written by
//! sync and is stripped before the state is read.

use crate::diagnostics::Diagnostics;
use crate::error::{Result, SpecflowError};
use crate::paths;
use crate::task::TaskInfo;
use crate::types::TaskState;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const FOOTER_START: &str = "<!-- task-metadata -->";
pub const FOOTER_END: &str = "<!-- /task-metadata -->";

/// Lines after a `[!]` checkbox searched for the reason it is blocked.
const ERROR_CONTEXT_LINES: usize = 5;

// ---------------------------------------------------------------------------
// ParsedTask / TaskFileParser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTask {
    pub id: String,
    pub title: String,
    pub state: TaskState,
    pub error_message: Option<String>,
    pub description: Option<String>,
    pub estimated_hours: Option<f64>,
}

impl ParsedTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state,
            error_message: None,
            description: None,
            estimated_hours: None,
        }
    }

    pub fn into_task_info(self, file_path: Option<String>) -> TaskInfo {
        let mut task = TaskInfo::new(self.id, self.title).with_state(self.state);
        task.error_message = self.error_message;
        task.description = self.description;
        task.estimated_hours = self.estimated_hours;
        task.file_path = file_path;
        task
    }
}

/// Turns one task file into a task. `None` means the file has no task id
/// and is skipped.
pub trait TaskFileParser: Send + Sync + fmt::Debug {
    fn parse(&self, file_stem: &str, content: &str) -> Option<ParsedTask>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownTaskParser;

impl TaskFileParser for MarkdownTaskParser {
    fn parse(&self, file_stem: &str, content: &str) -> Option<ParsedTask> {
        let body = strip_footer(content);
        let id = id_from_file_stem(file_stem).or_else(|| id_from_content(&body))?;
        let title = title_from_content(&body).unwrap_or_else(|| id.clone());
        let (state, primary) = infer_state(&body);

        let error_message = match state {
            TaskState::Blocked | TaskState::Failed => error_near_marker(&body, primary)
                .or_else(|| footer_field(content, "Error")),
            _ => None,
        };

        Some(ParsedTask {
            id,
            title,
            state,
            error_message,
            description: description_from_content(&body),
            estimated_hours: estimate_from_content(&body),
        })
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// A task file that yielded a task.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// `path` relative to the project root, forward slashes.
    pub rel_path: String,
    pub parsed: ParsedTask,
}

/// Parse every task file of `feature_id`. Unreadable files are recorded as
/// discovery incidents and skipped; files without a task id are skipped
/// silently. When two files claim the same id the first in name order wins.
pub fn scan_feature(
    root: &Path,
    feature_id: &str,
    parser: &dyn TaskFileParser,
    diagnostics: &Diagnostics,
) -> Result<Vec<ScannedFile>> {
    let mut scanned: Vec<ScannedFile> = Vec::new();
    for path in paths::task_files(root, feature_id)? {
        let rel_path = paths::relative_display(root, &path);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                let err = SpecflowError::TaskDiscovery {
                    path: path.clone(),
                    reason: e.to_string(),
                };
                diagnostics.record_error(rel_path, &err);
                continue;
            }
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(parsed) = parser.parse(&stem, &content) else {
            tracing::debug!(file = %rel_path, "no task id, skipping");
            continue;
        };
        if scanned.iter().any(|f| f.parsed.id == parsed.id) {
            tracing::warn!(file = %rel_path, task = %parsed.id, "duplicate task id, skipping");
            continue;
        }
        scanned.push(ScannedFile {
            path,
            rel_path,
            parsed,
        });
    }
    Ok(scanned)
}

// ---------------------------------------------------------------------------
// Regexes
// ---------------------------------------------------------------------------

static STEM_ID_RE: OnceLock<Regex> = OnceLock::new();
static HEADING_ID_RE: OnceLock<Regex> = OnceLock::new();
static FIELD_ID_RE: OnceLock<Regex> = OnceLock::new();
static HEADING_RE: OnceLock<Regex> = OnceLock::new();
static TITLE_PREFIX_RE: OnceLock<Regex> = OnceLock::new();
static CHECKBOX_RE: OnceLock<Regex> = OnceLock::new();
static STATUS_RE: OnceLock<Regex> = OnceLock::new();
static ERROR_KEYWORD_RE: OnceLock<Regex> = OnceLock::new();
static ERROR_TEXT_RE: OnceLock<Regex> = OnceLock::new();
static ESTIMATE_RE: OnceLock<Regex> = OnceLock::new();

fn stem_id_re() -> &'static Regex {
    STEM_ID_RE.get_or_init(|| Regex::new(r"(?i)^(t\d{1,5})(?:[-_. ]|$)").unwrap())
}

fn heading_id_re() -> &'static Regex {
    HEADING_ID_RE
        .get_or_init(|| Regex::new(r"(?mi)^#{1,6}\s+(?:task\s+)?(T\d{1,5})\b").unwrap())
}

fn field_id_re() -> &'static Regex {
    FIELD_ID_RE.get_or_init(|| {
        Regex::new(r"(?mi)^\s*(?:[-*]\s+)?\*\*task[ _-]?id:?\*\*:?\s*(T\d{1,5})\b").unwrap()
    })
}

fn heading_re() -> &'static Regex {
    HEADING_RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*#*\s*$").unwrap())
}

fn title_prefix_re() -> &'static Regex {
    TITLE_PREFIX_RE
        .get_or_init(|| Regex::new(r"^(?i:task\b)?\s*(?i:T\d{1,5}\b)?\s*[:.\-]?\s*").unwrap())
}

pub(crate) fn checkbox_re() -> &'static Regex {
    CHECKBOX_RE.get_or_init(|| Regex::new(r"(?m)^(\s*[-*]\s+\[)([ xX>!~])(\])").unwrap())
}

pub(crate) fn status_re() -> &'static Regex {
    STATUS_RE.get_or_init(|| {
        Regex::new(r"(?mi)^(\s*(?:[-*]\s+)?\*\*Status:\*\*[ \t]*)([A-Za-z_ \-]*?)[ \t]*$").unwrap()
    })
}

fn error_keyword_re() -> &'static Regex {
    ERROR_KEYWORD_RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:[-*]\s+)?\**\s*(?:error|failed|failure|blocked)\s*\**\s*:").unwrap()
    })
}

fn error_text_re() -> &'static Regex {
    ERROR_TEXT_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:error|failed|failure|blocked|reason)\s*\**\s*:\s*\**\s*(.+)").unwrap()
    })
}

fn estimate_re() -> &'static Regex {
    ESTIMATE_RE.get_or_init(|| {
        Regex::new(r"(?mi)^\s*(?:[-*]\s+)?\*\*(?:estimate|estimated hours|estimated):?\*\*:?\s*([0-9]+(?:\.[0-9]+)?)\s*h?")
            .unwrap()
    })
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

fn id_from_file_stem(stem: &str) -> Option<String> {
    stem_id_re()
        .captures(stem)
        .map(|caps| caps[1].to_ascii_uppercase())
}

fn id_from_content(body: &str) -> Option<String> {
    heading_id_re()
        .captures(body)
        .or_else(|| field_id_re().captures(body))
        .map(|caps| caps[1].to_ascii_uppercase())
}

/// First heading, without `Task` / `T001:` prefixes.
fn title_from_content(body: &str) -> Option<String> {
    let heading = heading_re().captures(body)?;
    let title = title_prefix_re().replace(&heading[1], "").trim().to_string();
    (!title.is_empty()).then_some(title)
}

/// Returns the state and the byte offset of the primary checkbox, if any.
fn infer_state(body: &str) -> (TaskState, Option<usize>) {
    let primary = checkbox_re().captures(body);
    let marker = primary
        .as_ref()
        .and_then(|caps| caps[2].chars().next());
    let status = status_line_state(body);

    let mut state = match marker.and_then(TaskState::from_marker) {
        // A status line only picks between states sharing the marker.
        Some(from_marker) => match status {
            Some(s) if s.marker() == from_marker.marker() => s,
            _ => from_marker,
        },
        None => status.unwrap_or(TaskState::Pending),
    };

    // An explicit status line settles the state; keywords only fill the gap.
    let unmarked = matches!(marker, None | Some(' ')) && status.is_none();
    if unmarked && state == TaskState::Pending && error_keyword_re().is_match(body) {
        state = TaskState::Blocked;
    }
    (state, primary.and_then(|caps| caps.get(0)).map(|m| m.start()))
}

pub(crate) fn status_line_state(body: &str) -> Option<TaskState> {
    let caps = status_re().captures(body)?;
    caps[2].parse().ok()
}

/// Reason text on the primary checkbox line or the few lines after it,
/// falling back to the first error-like line anywhere in the body.
fn error_near_marker(body: &str, primary: Option<usize>) -> Option<String> {
    let from_region = primary.and_then(|start| {
        body[start..]
            .lines()
            .take(ERROR_CONTEXT_LINES + 1)
            .find_map(error_text)
    });
    from_region.or_else(|| body.lines().find_map(error_text))
}

fn error_text(line: &str) -> Option<String> {
    let caps = error_text_re().captures(line)?;
    let text = caps[1].trim().trim_matches('*').trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// First prose paragraph after the first heading.
fn description_from_content(body: &str) -> Option<String> {
    let mut lines = body.lines().skip_while(|l| !l.trim_start().starts_with('#'));
    lines.next()?;
    let paragraph: Vec<&str> = lines
        .map(str::trim)
        .skip_while(|l| l.is_empty())
        .take_while(|l| !l.is_empty())
        .collect();
    let is_prose = paragraph.first().is_some_and(|first| {
        !(first.starts_with('-')
            || first.starts_with('*')
            || first.starts_with('#')
            || first.starts_with("---"))
    });
    is_prose.then(|| paragraph.join(" "))
}

fn estimate_from_content(body: &str) -> Option<f64> {
    estimate_re()
        .captures(body)
        .and_then(|caps| caps[1].parse().ok())
        .filter(|h: &f64| *h > 0.0)
}

// ---------------------------------------------------------------------------
// Footer
// ---------------------------------------------------------------------------

/// Content without the metadata footer and its `---` separator.
pub fn strip_footer(content: &str) -> String {
    let Some(start) = content.find(FOOTER_START) else {
        return content.to_string();
    };
    let end = content[start..]
        .find(FOOTER_END)
        .map(|offset| start + offset + FOOTER_END.len())
        .unwrap_or(content.len());

    let head = content[..start].trim_end();
    let head = head.strip_suffix("---").unwrap_or(head).trim_end();
    let tail = content[end..].trim();

    let mut body = head.to_string();
    if !tail.is_empty() {
        body.push_str("\n\n");
        body.push_str(tail);
    }
    body.push('\n');
    body
}

/// Value of `- **<name>:** value` inside the metadata footer.
pub fn footer_field(content: &str, name: &str) -> Option<String> {
    let start = content.find(FOOTER_START)?;
    let end = content[start..]
        .find(FOOTER_END)
        .map(|offset| start + offset)
        .unwrap_or(content.len());
    let prefix = format!("- **{name}:**");
    content[start..end]
        .lines()
        .find_map(|line| line.trim().strip_prefix(&prefix))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
