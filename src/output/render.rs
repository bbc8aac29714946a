//! Plain-text rendering of wiki content
//!
//! Rules apply line by line; line structure is kept except for dropped
//! delimiter lines and `&br;` breaks.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::TextFormatting;

static MD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+").expect("valid regex"));
static MD_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(>\s?)+").expect("valid regex"));
static MD_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static MD_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__|~~|`").expect("valid regex"));

static BL_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*{1,6}\s*").expect("valid regex"));
static BL_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\{/?(code|quote)(:[^}]*)?\}\s*$").expect("valid regex"));
static BL_LABELED_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]>:]*)[>:][^\]]*\]\]").expect("valid regex"));
static BL_PAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid regex"));
static BL_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"'{2,3}|%%").expect("valid regex"));

/// Render `content` to plain text using the project's markup dialect
pub fn render_plain_text(content: &str, formatting: TextFormatting) -> String {
    let mut lines = Vec::new();
    for line in content.lines() {
        let rendered = match formatting {
            TextFormatting::Markdown => render_markdown_line(line),
            TextFormatting::Backlog => render_backlog_line(line),
        };
        if let Some(rendered) = rendered {
            lines.extend(rendered.split('\n').map(|l| l.trim_end().to_string()));
        }
    }
    lines.join("\n")
}

fn render_markdown_line(line: &str) -> Option<String> {
    if line.trim_start().starts_with("```") {
        return None;
    }
    let line = MD_HEADING.replace(line, "");
    let line = MD_QUOTE.replace(&line, "");
    let line = MD_IMAGE.replace_all(&line, "$1");
    let line = MD_LINK.replace_all(&line, "$1");
    Some(MD_EMPHASIS.replace_all(&line, "").into_owned())
}

fn render_backlog_line(line: &str) -> Option<String> {
    if BL_BLOCK.is_match(line) {
        return None;
    }
    let line = BL_HEADING.replace(line, "");
    let line = BL_LABELED_LINK.replace_all(&line, "$1");
    let line = BL_PAGE_LINK.replace_all(&line, "$1");
    let line = BL_EMPHASIS.replace_all(&line, "");
    Some(line.replace("&br;", "\n"))
}
