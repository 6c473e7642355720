use std::fmt;

use crate::error::{Error, Result};

const MAX_SEGMENT_LEN: usize = 255;

/// A normalized path inside a repository. The empty segment list is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeasePath {
    segments: Vec<String>,
}

impl LeasePath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments = path
            .trim()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| validate_segment(s).map(|()| s.to_string()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }

    /// Two paths overlap iff one is a segment-wise prefix of the other.
    #[must_use]
    pub fn overlaps(&self, other: &LeasePath) -> bool {
        let n = self.segments.len().min(other.segments.len());
        self.segments[..n] == other.segments[..n]
    }

    /// Canonical form with a trailing slash (`/a/b/`, root `/`).
    ///
    /// Byte-prefix containment between index keys is exactly segment-wise
    /// prefix containment between paths, which is what range scans rely on.
    #[must_use]
    pub fn index_key(&self) -> String {
        let mut key = String::from("/");
        for segment in &self.segments {
            key.push_str(segment);
            key.push('/');
        }
        key
    }

    /// Index keys of every proper ancestor, root first.
    #[must_use]
    pub fn ancestor_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.segments.len());
        let mut key = String::from("/");
        for segment in &self.segments {
            keys.push(key.clone());
            key.push_str(segment);
            key.push('/');
        }
        keys
    }
}

impl fmt::Display for LeasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(Error::BadRequest(format!(
            "Path segment cannot exceed {MAX_SEGMENT_LEN} characters"
        )));
    }

    if segment == "." || segment == ".." {
        return Err(Error::BadRequest(
            "Path segment cannot be a relative reference".to_string(),
        ));
    }

    const INVALID_CHARS: &[char] = &['\0', '\n', '\r'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::BadRequest(
            "Path segment contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
