use crate::error::{Result, TfdepError};
use regex::Regex;
use tracing::warn;

/// A provider declared inside a `required_providers` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    /// Local name, e.g. `aws` in `aws = { ... }`.
    pub key: String,
    pub source: String,
    pub version: String,
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Code,
    Str,
    LineComment,
    BlockComment,
}

/// Blank out comments and string contents while keeping byte offsets intact,
/// so structural matching never trips over braces or keywords inside them.
/// String delimiters are kept.
fn mask_comments_and_strings(text: &str) -> String {
    let mut masked = String::with_capacity(text.len());
    let mut state = ScanState::Code;
    let mut chars = text.chars().peekable();

    let blank = |masked: &mut String, c: char| {
        for _ in 0..c.len_utf8() {
            masked.push(' ');
        }
    };

    while let Some(c) = chars.next() {
        match state {
            ScanState::Code => match c {
                '"' => {
                    state = ScanState::Str;
                    masked.push('"');
                }
                '#' => {
                    state = ScanState::LineComment;
                    masked.push(' ');
                }
                '/' if chars.peek() == Some(&'/') => {
                    state = ScanState::LineComment;
                    masked.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = ScanState::BlockComment;
                    masked.push_str("  ");
                }
                _ => masked.push(c),
            },
            ScanState::Str => match c {
                '\\' => {
                    masked.push(' ');
                    if let Some(escaped) = chars.next() {
                        blank(&mut masked, escaped);
                    }
                }
                '"' => {
                    state = ScanState::Code;
                    masked.push('"');
                }
                '\n' => {
                    // Unterminated string; resync at the line break.
                    state = ScanState::Code;
                    masked.push('\n');
                }
                _ => blank(&mut masked, c),
            },
            ScanState::LineComment => {
                if c == '\n' {
                    state = ScanState::Code;
                    masked.push('\n');
                } else {
                    blank(&mut masked, c);
                }
            }
            ScanState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = ScanState::Code;
                    masked.push_str("  ");
                } else if c == '\n' {
                    masked.push('\n');
                } else {
                    blank(&mut masked, c);
                }
            }
        }
    }

    masked
}

/// Index of the `}` closing the `{` at `open`.
fn matching_brace(masked: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, byte) in masked.as_bytes()[open..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| TfdepError::ManifestParsing(format!("Regex error: {e}")))
}

/// Read the string attribute `name` from an entry body, using the masked copy
/// for structure and the original text for the value.
fn string_attribute(
    original: &str,
    masked: &str,
    range: (usize, usize),
    name: &str,
) -> Result<Option<String>> {
    let attribute = regex(&format!(r#"(?m)(?:^|[\s{{,])({name})\s*=\s*""#))?;
    let body = &masked[range.0..range.1];

    let Some(found) = attribute.find(body) else {
        return Ok(None);
    };

    let open_quote = range.0 + found.end() - 1;
    let close_quote = masked[open_quote + 1..range.1]
        .find('"')
        .map(|i| open_quote + 1 + i)
        .ok_or_else(|| {
            TfdepError::ManifestParsing(format!("Unterminated string for attribute '{name}'"))
        })?;

    Ok(Some(original[open_quote + 1..close_quote].to_string()))
}

/// Collect every provider declared in the manifest's `required_providers` blocks,
/// in declaration order.
pub fn parse_required_providers(text: &str) -> Result<Vec<ProviderEntry>> {
    let masked = mask_comments_and_strings(text);
    let block_re = regex(r"\brequired_providers\s*\{")?;
    let entry_re = regex(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*([{"])"#)?;

    let mut providers = Vec::new();

    for block in block_re.find_iter(&masked) {
        let open = block.end() - 1;
        let close = matching_brace(&masked, open).ok_or_else(|| {
            TfdepError::ManifestParsing("Unclosed required_providers block".to_string())
        })?;

        let mut cursor = open + 1;
        while let Some(caps) = entry_re.captures_at(&masked[..close], cursor) {
            let (Some(key), Some(opener)) = (caps.get(1), caps.get(2)) else {
                break;
            };
            let key = key.as_str().to_string();

            if opener.as_str() == "\"" {
                return Err(TfdepError::ManifestParsing(format!(
                    "Provider '{key}' uses the legacy version-only syntax; declare source and version"
                )));
            }

            let entry_open = opener.start();
            let entry_close = matching_brace(&masked, entry_open).ok_or_else(|| {
                TfdepError::ManifestParsing(format!("Unclosed block for provider '{key}'"))
            })?;
            let range = (entry_open + 1, entry_close);

            let source = string_attribute(text, &masked, range, "source")?.ok_or_else(|| {
                TfdepError::ManifestParsing(format!("Provider '{key}' has no source"))
            })?;
            cursor = entry_close + 1;
            let Some(version) = string_attribute(text, &masked, range, "version")? else {
                warn!(provider = %key, %source, "Provider has no version pin, skipping");
                continue;
            };

            providers.push(ProviderEntry {
                key,
                source,
                version,
            });
        }
    }

    Ok(providers)
}
