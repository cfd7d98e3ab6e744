//! Route patterns: parsing, specificity ordering and segment matching.
//!
//! | Pattern               | Example match              | Captured params                   |
//! |-----------------------|----------------------------|-----------------------------------|
//! | `/users`              | `/users`                   | *(none)*                          |
//! | `/users/:id`          | `/users/42`                | `id → "42"`                       |
//! | `/files/*`            | `/files/docs/readme.txt`   | `wildcard → "docs/readme.txt"`    |
//! | `/assets/*path`       | `/assets`                  | `path → ""`                       |
//!
//! Empty segments are ignored on both sides, so `/users/` and `/users` are the
//! same pattern and match the same paths.

use std::cmp::Ordering;

use crate::context::PathParams;

/// Capture name used by an unnamed `*` wildcard.
pub const DEFAULT_WILDCARD: &str = "wildcard";

/// One segment of a [`RoutePattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the path segment exactly.
    Literal(String),
    /// `:name` captures exactly one path segment.
    Param(String),
    /// `*` or `*name` captures all remaining segments, possibly none.
    Wildcard(String),
}

impl Segment {
    // Lower ranks are more specific.
    fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 0,
            Segment::Param(_) => 1,
            Segment::Wildcard(_) => 2,
        }
    }

    // Two segments overlap when some path segment could satisfy both.
    fn same_shape(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            (Segment::Param(_), Segment::Param(_)) => true,
            (Segment::Wildcard(_), Segment::Wildcard(_)) => true,
            _ => false,
        }
    }
}

/// Why a pattern string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    MissingLeadingSlash,
    EmptyParamName,
    DuplicateParamName,
    WildcardNotLast,
}

impl PatternError {
    pub fn reason(self) -> &'static str {
        match self {
            Self::MissingLeadingSlash => "pattern must start with '/'",
            Self::EmptyParamName => "parameter segment needs a name after ':'",
            Self::DuplicateParamName => "parameter name used twice",
            Self::WildcardNotLast => "wildcard must be the last segment",
        }
    }
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Compiles a pattern such as `"/users/:id/posts/*rest"`.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] for a pattern without a leading `/`, a `:`
    /// without a name, a repeated capture name, or a wildcard that is not the
    /// final segment.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash);
        }

        let mut segments: Vec<Segment> = Vec::new();
        for raw in split_path(pattern) {
            if matches!(segments.last(), Some(Segment::Wildcard(_))) {
                return Err(PatternError::WildcardNotLast);
            }

            let segment = if let Some(name) = raw.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::EmptyParamName);
                }
                Segment::Param(name.to_owned())
            } else if let Some(name) = raw.strip_prefix('*') {
                let name = if name.is_empty() { DEFAULT_WILDCARD } else { name };
                Segment::Wildcard(name.to_owned())
            } else {
                Segment::Literal(raw.to_owned())
            };

            if let Some(name) = capture_name(&segment) {
                if segments.iter().filter_map(capture_name).any(|n| n == name) {
                    return Err(PatternError::DuplicateParamName);
                }
            }
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_owned(),
            segments,
        })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of all captures, in pattern order.
    pub fn param_names(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(capture_name)
            .map(str::to_owned)
            .collect()
    }

    /// `true` if some concrete path would match both patterns with equal
    /// specificity, i.e. neither can be preferred over the other.
    pub fn is_ambiguous_with(&self, other: &RoutePattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.same_shape(b))
    }

    /// Orders patterns most-specific first: literal before parameter before
    /// wildcard, deciding at the leftmost differing segment.
    pub fn cmp_specificity(&self, other: &RoutePattern) -> Ordering {
        let lhs = self.segments.iter().map(Segment::rank);
        let rhs = other.segments.iter().map(Segment::rank);
        lhs.cmp(rhs)
    }

    /// Matches pre-split path segments, returning the captures on success.
    pub fn matches(&self, path: &[&str]) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut rest = path;

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    let (first, tail) = rest.split_first()?;
                    if *first != lit.as_str() {
                        return None;
                    }
                    rest = tail;
                }
                Segment::Param(name) => {
                    let (first, tail) = rest.split_first()?;
                    params.insert(name.as_str(), *first);
                    rest = tail;
                }
                Segment::Wildcard(name) => {
                    params.insert(name.as_str(), rest.join("/"));
                    return Some(params);
                }
            }
        }

        rest.is_empty().then_some(params)
    }
}

fn capture_name(segment: &Segment) -> Option<&str> {
    match segment {
        Segment::Param(name) | Segment::Wildcard(name) => Some(name),
        Segment::Literal(_) => None,
    }
}

/// Splits a request path into its non-empty segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
