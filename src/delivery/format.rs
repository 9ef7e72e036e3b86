//! Markdown to Slack `mrkdwn` conversion and message splitting.

use std::sync::OnceLock;

use regex::{Captures, Regex};

// Patterns are static literals; compilation cannot fail.
#[allow(clippy::unwrap_used)]
fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

fn fenced_code() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?s)```[A-Za-z0-9_+-]*\n?(.*?)```")
}

fn inline_code() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"`[^`\n]+`")
}

fn heading() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"(?m)^#{1,6}[ \t]+(.+?)[ \t]*#*[ \t]*$")
}

fn bold() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"\*\*(.+?)\*\*|__(.+?)__")
}

fn strike() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"~~(.+?)~~")
}

fn link() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    cached(&CELL, r"\[([^\]\n]+)\]\((https?://[^)\s]+)\)")
}

/// Escape the three characters Slack treats as control syntax.
#[must_use]
pub fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert agent Markdown into Slack `mrkdwn`.
///
/// Code spans and fenced blocks are escaped but otherwise left alone.
/// Elsewhere: headings and `**bold**` become `*bold*`, `~~strike~~`
/// becomes `~strike~`, and `[text](url)` becomes `<url|text>`.
#[must_use]
pub fn markdown_to_mrkdwn(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for caps in fenced_code().captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&convert_prose(&text[cursor..whole.start()]));
        out.push_str("```\n");
        out.push_str(&escape_mrkdwn(body.as_str().trim_end_matches('\n')));
        out.push_str("\n```");
        cursor = whole.end();
    }
    out.push_str(&convert_prose(&text[cursor..]));
    out
}

fn convert_prose(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for span in inline_code().find_iter(text) {
        out.push_str(&convert_inline(&text[cursor..span.start()]));
        out.push_str(&escape_mrkdwn(span.as_str()));
        cursor = span.end();
    }
    out.push_str(&convert_inline(&text[cursor..]));
    out
}

fn convert_inline(text: &str) -> String {
    let escaped = escape_mrkdwn(text);
    let linked = link().replace_all(&escaped, "<$2|$1>");
    let bolded = bold().replace_all(&linked, |caps: &Captures<'_>| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!("*{inner}*")
    });
    let struck = strike().replace_all(&bolded, "~$1~");
    heading().replace_all(&struck, "*$1*").into_owned()
}

/// Split `text` into chunks of at most `limit` characters.
///
/// Prefers the last newline inside the window, but never cuts a chunk
/// shorter than half the limit; otherwise cuts hard at the limit. Newlines
/// at the start of a following chunk are dropped.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    loop {
        let Some((hard, _)) = rest.char_indices().nth(limit) else {
            if !rest.is_empty() || chunks.is_empty() {
                chunks.push(rest.to_owned());
            }
            break;
        };

        let window = &rest[..hard];
        let cut = match window.rfind('\n') {
            Some(idx) if window[..idx].chars().count() >= limit / 2 && idx > 0 => idx,
            _ => hard,
        };
        chunks.push(rest[..cut].to_owned());
        rest = rest[cut..].trim_start_matches('\n');
    }

    chunks
}
