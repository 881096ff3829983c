//! Field extractor — pulls structured intake fields out of a free-text body.
//!
//! The first non-blank line is the record name. The remaining fields are
//! labelled lines (`Phone Number: 555-1234`) matched case-insensitively
//! anywhere in the text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex("Phone Number"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| label_regex("Email Address"));
static SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex("Service"));
static NOTE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex("Special Note"));

/// `<Label>: <value>` at the start of a line, value up to the end of that line.
fn label_regex(label: &str) -> Regex {
    let pattern = format!(r"(?im)^[ \t]*{}[ \t]*:[ \t]*([^\r\n]*)", regex::escape(label));
    Regex::new(&pattern).expect("label pattern compiles")
}

/// Fields extracted from one message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub service: Option<String>,
    pub note: Option<String>,
}

impl ExtractedFields {
    /// A message without a derivable name cannot become a record.
    pub fn is_actionable(&self) -> bool {
        self.name.is_some()
    }
}

/// Extract intake fields from raw message text. Never fails.
pub fn extract(raw: &str) -> ExtractedFields {
    ExtractedFields {
        name: first_non_blank_line(raw),
        phone: capture(&PHONE_RE, raw),
        email: capture(&EMAIL_RE, raw),
        service: capture(&SERVICE_RE, raw),
        note: capture(&NOTE_RE, raw),
    }
}

fn first_non_blank_line(raw: &str) -> Option<String> {
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn capture(re: &Regex, raw: &str) -> Option<String> {
    re.captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}
