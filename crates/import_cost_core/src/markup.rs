//! Script extraction for single-file component dialects (Vue, Svelte).

use log::trace;
use regex::Regex;
use std::sync::LazyLock;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").expect("script block pattern is valid")
});

/// The first `<script>` block of a markup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBlock<'a> {
    pub content: &'a str,
    /// Added to 1-based lines of `content` to get lines of the whole file.
    pub line_offset: usize,
}

pub fn extract_script(markup: &str) -> Option<ScriptBlock<'_>> {
    let captures = SCRIPT_BLOCK.captures(markup)?;
    let content = captures.get(1)?.as_str();
    let line_offset = markup.lines().position(|line| line.contains("<script")).unwrap_or(0);
    trace!("Found script block of {} bytes at line offset {}", content.len(), line_offset);
    Some(ScriptBlock { content, line_offset })
}
