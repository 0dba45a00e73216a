//! Import of browser password exports (Chrome's `name,url,username,password`
//! CSV and similar layouts).

use crate::entries::{hostname, Entry};

pub const IMPORTED_NOTE: &str = "Imported from CSV";
pub const FALLBACK_TITLE: &str = "Imported";

/// Split CSV text into rows. Handles quoted fields with `""` escapes and
/// embedded separators/newlines, LF or CRLF line ends. Rows that are entirely
/// blank are dropped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    cell.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                cell.push(ch);
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut cell)),
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            _ => cell.push(ch),
        }
    }
    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    rows.retain(|r| r.iter().any(|c| !c.trim().is_empty()));
    rows
}

fn normalize_header(h: &str) -> String {
    h.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

struct Columns {
    name: Option<usize>,
    url: Option<usize>,
    user: Option<usize>,
    pass: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Self {
        let header: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
        Self {
            name: position(&header, |h| h == "name" || h == "title"),
            url: position(&header, |h| h.contains("url")),
            user: position(&header, |h| h.contains("user")),
            pass: position(&header, |h| h.contains("pass")),
        }
    }
}

fn position(header: &[String], pred: impl Fn(&str) -> bool) -> Option<usize> {
    header.iter().position(|h| pred(h.as_str()))
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map(String::as_str).unwrap_or("")
}

/// Turn parsed rows (first row is the header) into vault entries. Rows with
/// no url, username or password are skipped.
pub fn entries_from_rows(rows: &[Vec<String>]) -> Vec<Entry> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let cols = Columns::from_header(header);
    let mut entries = Vec::new();
    for row in body {
        let url = cell(row, cols.url);
        let username = cell(row, cols.user);
        let password = cell(row, cols.pass);
        if url.is_empty() && username.is_empty() && password.is_empty() {
            continue;
        }
        let name = cell(row, cols.name);
        let title = if !name.is_empty() {
            name.to_string()
        } else {
            hostname(url).unwrap_or_else(|| FALLBACK_TITLE.to_string())
        };
        let mut entry = Entry::new(&title);
        entry.username = Some(username.to_string());
        entry.password = Some(password.to_string());
        entry.url = Some(url.to_string());
        entry.notes = Some(IMPORTED_NOTE.to_string());
        entries.push(entry);
    }
    entries
}

pub fn import_csv(text: &str) -> Vec<Entry> {
    entries_from_rows(&parse_csv(text))
}
