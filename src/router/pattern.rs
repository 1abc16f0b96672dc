//! Route pattern compilation and substitution.
//!
//! Patterns are `/`-separated segments. A segment is either a literal, a
//! named capture `{name}`, or (last segment only) a greedy capture
//! `{name...}` that takes the rest of the path.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("route pattern must not be empty")]
    Empty,

    #[error("route pattern {0:?} must start with '/'")]
    MissingLeadingSlash(String),

    #[error("route pattern {0:?} has a parameter without a name")]
    EmptyParamName(String),

    #[error("route pattern {pattern:?} uses parameter {name:?} more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("greedy parameter {name:?} must be the last segment of {pattern:?}")]
    GreedyNotLast { pattern: String, name: String },

    #[error("segment {segment:?} of {pattern:?} mixes braces with literal text")]
    StrayBrace { pattern: String, segment: String },

    #[error("no value for parameter {0:?}")]
    MissingParam(String),

    #[error("pattern has no parameter {0:?}")]
    UnknownParam(String),

    #[error("value for parameter {0:?} is empty")]
    EmptyValue(String),
}

/// One compiled segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Greedy(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compile `raw`.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] describing the first structural problem.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(PatternError::MissingLeadingSlash(raw.to_string()));
        };

        let parts = split_segments(rest);
        let mut segments = Vec::with_capacity(parts.len());
        let mut seen = HashSet::new();

        for (i, part) in parts.iter().enumerate() {
            let segment = parse_segment(raw, part)?;

            if let Segment::Param(name) | Segment::Greedy(name) = &segment
                && !seen.insert(name.clone())
            {
                return Err(PatternError::DuplicateParam {
                    pattern: raw.to_string(),
                    name: name.clone(),
                });
            }
            if let Segment::Greedy(name) = &segment
                && i + 1 != parts.len()
            {
                return Err(PatternError::GreedyNotLast {
                    pattern: raw.to_string(),
                    name: name.clone(),
                });
            }

            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of every capture, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) | Segment::Greedy(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Pull the captured values out of a path this pattern matched.
    ///
    /// `path` must be the split form produced by [`split_path`]. A greedy
    /// capture joins the remaining segments back with `/`.
    pub(crate) fn captures(&self, path: &[&str]) -> Vec<(String, String)> {
        let mut params = Vec::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(_) => {}
                Segment::Param(name) => {
                    if let Some(value) = path.get(i) {
                        params.push((name.clone(), (*value).to_string()));
                    }
                }
                Segment::Greedy(name) => {
                    let rest = path.get(i..).map(|r| r.join("/")).unwrap_or_default();
                    params.push((name.clone(), rest));
                }
            }
        }
        params
    }

    /// Build a concrete path by substituting every capture.
    ///
    /// # Errors
    ///
    /// A capture without a value, a value for a capture the pattern does not
    /// have, or an empty value.
    pub fn substitute<K, V>(&self, values: &[(K, V)]) -> Result<String, PatternError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let names: HashSet<&str> = self.param_names().collect();
        for (key, value) in values {
            let key = key.as_ref();
            if !names.contains(key) {
                return Err(PatternError::UnknownParam(key.to_string()));
            }
            if value.as_ref().is_empty() {
                return Err(PatternError::EmptyValue(key.to_string()));
            }
        }

        let lookup = |name: &str| {
            values
                .iter()
                .find(|(k, _)| k.as_ref() == name)
                .map(|(_, v)| v.as_ref())
                .ok_or_else(|| PatternError::MissingParam(name.to_string()))
        };

        let mut path = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Literal(lit) => path.push_str(lit),
                Segment::Param(name) | Segment::Greedy(name) => path.push_str(lookup(name)?),
            }
        }

        if path.is_empty() {
            path.push('/');
        }
        Ok(path)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_segment(raw: &str, part: &str) -> Result<Segment, PatternError> {
    if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
        let (name, greedy) = match inner.strip_suffix("...") {
            Some(name) => (name, true),
            None => (inner, false),
        };

        if name.is_empty() {
            return Err(PatternError::EmptyParamName(raw.to_string()));
        }
        if name.contains(['{', '}', '/']) {
            return Err(PatternError::StrayBrace {
                pattern: raw.to_string(),
                segment: part.to_string(),
            });
        }

        return Ok(if greedy {
            Segment::Greedy(name.to_string())
        } else {
            Segment::Param(name.to_string())
        });
    }

    if part.contains(['{', '}']) {
        return Err(PatternError::StrayBrace {
            pattern: raw.to_string(),
            segment: part.to_string(),
        });
    }
    Ok(Segment::Literal(part.to_string()))
}

fn split_segments(rest: &str) -> Vec<&str> {
    if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('/').collect()
    }
}

/// Split a request path into the segments matched against patterns.
///
/// `/` is no segments; a trailing slash leaves an empty last segment.
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    split_segments(path.strip_prefix('/').unwrap_or(path))
}
