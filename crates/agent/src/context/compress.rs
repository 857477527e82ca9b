//! Tool output compression.
//!
//! Long tool results are replaced by a summary before they reach the model,
//! so context size stays stable no matter how chatty a tool is. The output
//! of [`ToolOutputCompressor::compress`] always fits the limit, which makes
//! compression idempotent: compressing a compressed text changes nothing.

const LIST_MARKERS: &[&str] = &["- ", "* ", "• "];

#[derive(Debug, Clone, Copy)]
pub struct ToolOutputCompressor {
    /// Maximum characters of a tool message sent to the model
    limit: usize,
    /// Items named in a list summary
    preview_items: usize,
}

impl ToolOutputCompressor {
    pub fn new(limit: usize, preview_items: usize) -> Self {
        Self {
            limit,
            preview_items: preview_items.max(1),
        }
    }

    pub fn compress(&self, content: &str) -> String {
        if content.chars().count() <= self.limit {
            return content.to_string();
        }
        if let Some(summary) = self.summarize_list(content)
            && summary.chars().count() <= self.limit
        {
            return summary;
        }
        self.truncate(content)
    }

    /// `header` + item lines, or `header: a, b, c, ...`, becomes
    /// `header: a, b, c (and N more)`.
    fn summarize_list(&self, content: &str) -> Option<String> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next()?.trim();
        let rest: Vec<&str> = lines.collect();
        let items: Vec<&str> = rest.iter().filter_map(|l| list_item(l)).collect();
        if items.len() != rest.len() {
            return None;
        }

        let (label, items) = if items.is_empty() {
            let (label, inline) = header.rsplit_once(": ")?;
            let inline: Vec<&str> = inline.split(", ").map(str::trim).collect();
            (label, inline)
        } else {
            (header.trim_end_matches(':'), items)
        };

        if items.len() <= self.preview_items {
            return None;
        }
        let shown = items[..self.preview_items].join(", ");
        let rest = items.len() - self.preview_items;
        Some(format!("{label}: {shown} (and {rest} more)"))
    }

    fn truncate(&self, content: &str) -> String {
        let total = content.chars().count();
        let suffix = format!(" … [truncated, {total} chars total]");
        let keep = self.limit.saturating_sub(suffix.chars().count());
        if keep == 0 {
            return content.chars().take(self.limit).collect();
        }
        let head: String = content.chars().take(keep).collect();
        format!("{}{suffix}", head.trim_end())
    }
}

/// The text of a bullet or numbered list line, if it is one.
fn list_item(line: &str) -> Option<&str> {
    let line = line.trim();
    if let Some(item) = LIST_MARKERS.iter().find_map(|m| line.strip_prefix(m)) {
        return Some(item.trim());
    }
    let (num, rest) = line.split_once(". ")?;
    num.chars()
        .all(|c| c.is_ascii_digit())
        .then(|| rest.trim())
        .filter(|_| !num.is_empty())
}
