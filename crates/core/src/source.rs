//! Source reference normalization for new submissions.
//!
//! Users paste references in many shapes, including a video link appended
//! to another site's path (`https://host/videos/https://youtu.be/ID`). The
//! normalized form is what the duplicate guard compares and what gets sent
//! to the create endpoint.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::SourceError;

static HTTP_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

/// Markers of an embedded YouTube reference inside a path.
const YOUTUBE_MARKERS: &[&str] = &["youtube.com", "youtu.be", "watch?v="];

/// Normalize a raw user reference into a canonical source URL.
pub fn normalize_source_url(raw: &str) -> Result<String, SourceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SourceError::Empty);
    }

    let candidate = extract_reference(trimmed);
    let with_scheme = if candidate.contains("://") {
        candidate
    } else {
        format!("https://{candidate}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| SourceError::Malformed(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SourceError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SourceError::Malformed(format!("missing host in '{trimmed}'")));
    }
    url.set_fragment(None);

    Ok(url.into())
}

/// Pull the reference the user meant out of the pasted text.
fn extract_reference(input: &str) -> String {
    let parts: Vec<&str> = input.split('/').collect();
    if let Some(idx) = parts
        .iter()
        .position(|part| YOUTUBE_MARKERS.iter().any(|m| part.contains(m)))
    {
        let tail = parts[idx..].join("/");
        if tail.starts_with("watch?v=") {
            return format!("https://www.youtube.com/{tail}");
        }
        // `https:` and the empty segment before the embedded host were split
        // off; put the scheme back.
        if idx >= 2 && parts[idx - 1].is_empty() && parts[idx - 2].starts_with("http") {
            return format!("{}//{tail}", parts[idx - 2]);
        }
        return tail;
    }

    HTTP_URL
        .find(input)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| input.to_string())
}
