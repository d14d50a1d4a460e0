use crate::error::{Result, TfdepError};
use regex::Regex;

/// Result of rewriting a provider's pinned version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched(String),
    /// No `source`/`version` pair matched; the manifest is left untouched.
    NoMatch,
}

fn version_pin_pattern(source: &str, version: &str) -> Result<Regex> {
    let pattern = format!(
        r#"(?m)^[ \t]*source[ \t]*=[ \t]*"{}"[ \t]*\r?\n[ \t]*version[ \t]*=[ \t]*"({})"[ \t]*\r?$"#,
        regex::escape(source),
        regex::escape(version)
    );
    Regex::new(&pattern)
        .map_err(|e| TfdepError::ManifestParsing(format!("Regex error for {source}: {e}")))
}

/// Replace the version pinned directly under `source = "<source>"`.
///
/// Only the first matching pair is rewritten; every other byte of the manifest
/// (comments, formatting, other providers sharing the same version) is kept.
pub fn patch_provider_version(
    text: &str,
    source: &str,
    old_version: &str,
    new_version: &str,
) -> Result<PatchOutcome> {
    let pattern = version_pin_pattern(source, old_version)?;
    let Some(span) = pattern.captures(text).and_then(|caps| caps.get(1)) else {
        return Ok(PatchOutcome::NoMatch);
    };

    let mut patched = String::with_capacity(text.len() + new_version.len());
    patched.push_str(&text[..span.start()]);
    patched.push_str(new_version);
    patched.push_str(&text[span.end()..]);
    Ok(PatchOutcome::Patched(patched))
}
