//! Reader and writer for Docker-style `.env` files.
//!
//! Supported syntax:
//!
//! ```text
//! # comment
//! PLAIN=value            # trailing comment after a space is dropped
//! COLON: value
//! DOUBLE="tab\tescaped"  # \n \r \t \\ \" are unescaped
//! SINGLE='literal $VAR'  # \' and \\ are unescaped
//! BLOCK='first line
//! second line'
//! ```
//!
//! Values returned by the parser are the logical, unquoted strings.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::fsutil;

/// Parsed entries, ordered by key.
pub type EnvEntries = BTreeMap<String, String>;

/// File mode for env files written by [`update_file`].
pub const ENV_FILE_MODE: u32 = 0o644;

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*([:=])\s*(.*)$").expect("entry pattern is valid")
});

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse the env file at `path`. A missing file yields an empty map.
///
/// # Errors
///
/// Returns any I/O error other than `NotFound`, including invalid UTF-8.
pub fn parse_file(path: &Path) -> io::Result<EnvEntries> {
    match fs::File::open(path) {
        Ok(file) => parse_reader(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(EnvEntries::new()),
        Err(e) => Err(e),
    }
}

/// Parse env entries from any reader.
///
/// # Errors
///
/// Returns the underlying read error.
pub fn parse_reader(mut reader: impl Read) -> io::Result<EnvEntries> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    Ok(parse_str(&text))
}

/// Parse env entries from a string. Unparseable lines are skipped.
pub fn parse_str(text: &str) -> EnvEntries {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = EnvEntries::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if is_blank_or_comment(line) {
            continue;
        }
        let Some((key, raw)) = split_entry(line) else {
            continue;
        };

        let raw_left = raw.trim_start_matches([' ', '\t']);
        if opens_block(raw_left) {
            let mut parts = vec![&raw_left[1..]];
            while i < lines.len() {
                let next = lines[i];
                // A new key ends an unterminated block without consuming it.
                if ENTRY_RE.is_match(next) {
                    break;
                }
                i += 1;
                if let Some(last) = next.strip_suffix('\'') {
                    parts.push(last);
                    break;
                }
                parts.push(next);
            }
            out.insert(key.to_string(), parts.join("\n"));
            continue;
        }

        out.insert(key.to_string(), parse_single_line(raw));
    }
    out
}

fn parse_single_line(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        return String::new();
    }

    if let Some(body) = value.strip_prefix('"') {
        return unescape_double_quoted(body);
    }

    if value.len() > 1 && value.starts_with('\'') && value.ends_with('\'') {
        let inner = &value[1..value.len() - 1];
        return inner.replace("\\'", "'").replace("\\\\", "\\");
    }
    if value == "'" {
        return String::new();
    }

    match value.find(" #") {
        Some(idx) => value[..idx].trim().to_string(),
        None => value.to_string(),
    }
}

/// Unescape the body of a double-quoted value, stopping at the first
/// unescaped `"`. Unknown escapes keep the escaped character.
fn unescape_double_quoted(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut escaped = false;
    for c in body.chars() {
        if escaped {
            out.push(match c {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => break,
            other => out.push(other),
        }
    }
    out
}

fn is_blank_or_comment(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let caps = ENTRY_RE.captures(line)?;
    let key = caps.get(1)?.as_str();
    let raw = caps.get(3).map_or("", |m| m.as_str());
    Some((key, raw))
}

/// True if a value (left-trimmed) starts a single-quoted multi-line block.
fn opens_block(raw_left: &str) -> bool {
    raw_left.starts_with('\'') && !raw_left.trim_end_matches([' ', '\t']).ends_with('\'')
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Set `key` to `value` in the env file at `path`.
///
/// An existing entry is replaced in place, including every line of a
/// multi-line block; otherwise the entry is appended. Comments and unrelated
/// lines are preserved. The parent directory is created if needed and the
/// file is replaced atomically with mode `0644`.
///
/// # Errors
///
/// Returns the underlying I/O error from reading or writing.
pub fn update_file(path: &Path, key: &str, value: &str) -> io::Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let lines: Vec<&str> = existing.lines().collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 1);
    let mut found = false;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        let Some((k, raw)) = (!is_blank_or_comment(line))
            .then(|| split_entry(line))
            .flatten()
        else {
            out.push(line.to_string());
            i += 1;
            continue;
        };

        let block_end = block_end(&lines, i, raw);
        if k == key {
            found = true;
            out.push(format_entry(key, value));
        } else {
            out.extend(lines[i..block_end].iter().map(|l| l.to_string()));
        }
        i = block_end;
    }

    if !found {
        out.push(format_entry(key, value));
    }

    let mut data = out.join("\n");
    data.push('\n');
    fsutil::write_atomic_create_dirs(path, data.as_bytes(), ENV_FILE_MODE)
}

/// Index one past the last line of the entry starting at `start`.
fn block_end(lines: &[&str], start: usize, raw: &str) -> usize {
    if !opens_block(raw.trim_start_matches([' ', '\t'])) {
        return start + 1;
    }
    let mut j = start + 1;
    while j < lines.len() {
        if ENTRY_RE.is_match(lines[j]) {
            break;
        }
        let ends = lines[j].ends_with('\'');
        j += 1;
        if ends {
            break;
        }
    }
    j
}

/// Render `key` and `value` as a single env file entry.
///
/// - empty values render as `KEY=`
/// - multi-line values are single-quoted unless they contain `'` or `\r`,
///   start with a blank line, end with a newline, or have a line that looks
///   like an entry, in which case they are double-quoted and escaped
/// - values with spaces, `#`, quotes, backslashes, tabs or CRs are
///   double-quoted and escaped
/// - anything else is written bare
pub fn format_entry(key: &str, value: &str) -> String {
    if value.contains('\n') {
        // A continuation line that looks like an entry would end a quoted block early.
        let ambiguous = value.split('\n').skip(1).any(|l| ENTRY_RE.is_match(l));
        // A blank first line would read back as a closed `'` value.
        let blank_first = value.split('\n').next().is_some_and(|l| l.trim().is_empty());
        if ambiguous
            || blank_first
            || value.contains(['\'', '\r'])
            || value.ends_with('\n')
        {
            return format!("{key}=\"{}\"", escape_double_quoted(value));
        }
        return format!("{key}='{value}'");
    }

    if value.is_empty() {
        return format!("{key}=");
    }

    if value.contains([' ', '#', '"', '\'', '\\', '\t', '\r']) {
        return format!("{key}=\"{}\"", escape_double_quoted(value));
    }

    format!("{key}={value}")
}

fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}
