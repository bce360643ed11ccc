//! HTML rendering of a directory listing.

use chrono::DateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

/// One line of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    /// Modification time, seconds since the epoch.
    pub time: Option<i64>,
}

impl IndexEntry {
    fn href(&self) -> String {
        match self.kind {
            EntryKind::Dir => format!("{}/", self.name),
            EntryKind::File => self.name.clone(),
        }
    }
}

const NAME_WIDTH: usize = 50;

/// Render the listing of `path`. `with_parent` adds a `../` link.
pub fn render_listing(path: &str, entries: &[IndexEntry], with_parent: bool) -> String {
    let title = escape(path);
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>Index of {title}</title>\n"));
    out.push_str("</head>\n<body>\n");
    out.push_str(&format!("<h1>Index of {title}</h1>\n<hr>\n<pre>\n"));

    if with_parent {
        out.push_str("<a href=\"../\">../</a>\n");
    }
    for entry in entries {
        let href = entry.href();
        let padding = " ".repeat(NAME_WIDTH.saturating_sub(href.chars().count()).max(1));
        out.push_str(&format!(
            "<a href=\"{}\">{}</a>{}{:>16} {:>8}\n",
            escape(&href),
            escape(&href),
            padding,
            format_time(entry.time),
            format_size(entry.size),
        ));
    }

    out.push_str("</pre>\n<hr>\n</body>\n</html>\n");
    out
}

/// Escape text for HTML content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn format_time(time: Option<i64>) -> String {
    time.and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Human-readable size: plain bytes below 1 KiB, otherwise one decimal with
/// a binary unit suffix.
pub fn format_size(size: Option<u64>) -> String {
    const UNITS: [&str; 5] = ["K", "M", "G", "T", "P"];

    let Some(bytes) = size else {
        return "-".to_string();
    };
    if bytes < 1024 {
        return bytes.to_string();
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1}{}", UNITS[unit])
}
