//! Path normalization and ownership pattern matching.
//!
//! Pattern grammar, per `/`-separated segment:
//! - `**` matches any number of segments (including none)
//! - `*` matches exactly one segment
//! - anything else matches that segment literally
//!
//! Mixing `*` into a literal segment (`*.md`) is rejected; ownership is
//! assigned by directory and file name, not by extension.

use crate::core::error::WardenError;
use std::collections::HashSet;
use std::fmt;

/// Normalize a repo-relative path to its canonical `a/b/c` form.
///
/// Backslashes become `/`, `.` segments and repeated separators are dropped.
/// Absolute paths, drive prefixes and any `..` segment are rejected.
pub fn normalize_path(raw: &str) -> Result<String, WardenError> {
    let normalized = normalize_dir(raw)?;
    if normalized.is_empty() {
        return Err(WardenError::invalid_path(
            raw,
            "path resolves to the repository root",
        ));
    }
    Ok(normalized)
}

/// Like [`normalize_path`] but the repository root (`""`, `.`) is allowed.
pub fn normalize_dir(raw: &str) -> Result<String, WardenError> {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(WardenError::invalid_path(
            raw,
            "path must be repository-relative",
        ));
    }
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(WardenError::invalid_path(raw, "path traversal is not allowed"));
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Star,
    Globstar,
}

/// How strongly a pattern claims the paths it matches.
///
/// Ordering is the precedence used when several rules match: any exact rule
/// beats every glob, and among globs more leading literal segments win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Specificity {
    Glob { literal_prefix: usize },
    Exact,
}

impl fmt::Display for Specificity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob { literal_prefix } => write!(f, "glob(prefix={})", literal_prefix),
            Self::Exact => write!(f, "exact"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl OwnerPattern {
    pub fn parse(raw: &str) -> Result<Self, WardenError> {
        let trimmed = raw.trim();
        let bad = |reason: &str| {
            WardenError::Configuration(format!("invalid pattern '{}': {}", raw, reason))
        };
        if trimmed.is_empty() {
            return Err(bad("pattern is empty"));
        }
        let unified = trimmed.replace('\\', "/");
        if unified.starts_with('/') || has_drive_prefix(&unified) {
            return Err(bad("pattern must be repository-relative"));
        }

        let mut segments: Vec<Segment> = Vec::new();
        for part in unified.split('/') {
            let segment = match part {
                "" => return Err(bad("empty path segment")),
                "." | ".." => return Err(bad("relative segments are not allowed")),
                "**" => Segment::Globstar,
                "*" => Segment::Star,
                s if s.contains('*') => {
                    return Err(bad("'*' must occupy a whole segment"));
                }
                s => Segment::Literal(s.to_string()),
            };
            // `a/**/**/b` means the same as `a/**/b`
            if segment == Segment::Globstar && segments.last() == Some(&Segment::Globstar) {
                continue;
            }
            segments.push(segment);
        }

        Ok(Self {
            raw: unified,
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Number of literal segments before the first wildcard.
    pub fn literal_prefix_len(&self) -> usize {
        self.segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    pub fn specificity(&self) -> Specificity {
        if self.is_exact() {
            Specificity::Exact
        } else {
            Specificity::Glob {
                literal_prefix: self.literal_prefix_len(),
            }
        }
    }

    /// Match against an already-normalized path.
    pub fn matches(&self, normalized_path: &str) -> bool {
        let parts: Vec<&str> = normalized_path.split('/').collect();
        match_segments(&self.segments, &parts)
    }

    /// True when at least one concrete path is matched by both patterns.
    pub fn overlaps(&self, other: &OwnerPattern) -> bool {
        let (a, b) = (&self.segments, &other.segments);
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut stack = vec![(0usize, 0usize)];

        while let Some((i, j)) = stack.pop() {
            if !seen.insert((i, j)) {
                continue;
            }
            if i == a.len() && j == b.len() {
                return true;
            }
            if i < a.len() && a[i] == Segment::Globstar {
                stack.push((i + 1, j));
            }
            if j < b.len() && b[j] == Segment::Globstar {
                stack.push((i, j + 1));
            }
            if i < a.len() && j < b.len() && segments_compatible(&a[i], &b[j]) {
                let ni = if a[i] == Segment::Globstar { i } else { i + 1 };
                let nj = if b[j] == Segment::Globstar { j } else { j + 1 };
                if (ni, nj) != (i, j) {
                    stack.push((ni, nj));
                }
            }
        }
        false
    }
}

impl fmt::Display for OwnerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::Globstar, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((Segment::Star, rest)) => !path.is_empty() && match_segments(rest, &path[1..]),
        Some((Segment::Literal(lit), rest)) => {
            path.first() == Some(&lit.as_str()) && match_segments(rest, &path[1..])
        }
    }
}

/// Whether a single concrete segment can satisfy both pattern segments.
fn segments_compatible(a: &Segment, b: &Segment) -> bool {
    match (a, b) {
        (Segment::Literal(x), Segment::Literal(y)) => x == y,
        _ => true,
    }
}
