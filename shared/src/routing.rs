//! Path patterns with named parameters.
//!
//! Supports static segments (`/api/traces`), named parameters
//! (`/api/traces/{traceID}`) and a trailing splat (`/api/*`). Leading and
//! trailing slashes are ignored on both the pattern and the request path.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Static(String),
    Param(String),
}

#[derive(Debug, Clone)]
pub struct PathPattern {
    segments: Vec<Segment>,
    trailing_splat: bool,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let mut trimmed = pattern.trim().trim_matches('/');

        let mut trailing_splat = false;
        if trimmed == "*" {
            trailing_splat = true;
            trimmed = "";
        } else if let Some(stripped) = trimmed.strip_suffix("/*") {
            trailing_splat = true;
            trimmed = stripped;
        }

        let segments = split_segments(trimmed)
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Static(s.to_string()),
            })
            .collect();

        Self {
            segments,
            trailing_splat,
        }
    }

    /// Returns the captured parameters if `path` matches this pattern.
    pub fn captures<'a>(&self, path: &'a str) -> Option<HashMap<&str, &'a str>> {
        let mut request_segments = split_segments(path.trim().trim_matches('/'));
        let mut params = HashMap::new();

        for segment in &self.segments {
            let actual = request_segments.next()?;
            match segment {
                Segment::Static(expected) if expected != actual => return None,
                Segment::Static(_) => {}
                Segment::Param(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    params.insert(name.as_str(), actual);
                }
            }
        }

        if self.trailing_splat || request_segments.next().is_none() {
            Some(params)
        } else {
            None
        }
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(move |_| !path.is_empty())
}
