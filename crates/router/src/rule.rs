//! Path pattern rules.
//!
//! A rule is a slash-delimited pattern whose segments are either literal
//! text or named parameters in angle brackets, with an optional converter
//! prefix: `/users/<int:id>/posts/<slug>`. The `int` converter accepts
//! decimal digits only and yields an integer argument; the default
//! converter accepts any single segment and yields a string.
//!
//! A trailing slash is semantically significant. A rule ending in `/`
//! does not match the same path without the final slash; instead the
//! router answers such requests with a redirect to the canonical
//! (slashed) form, probed via [`Rule::matches_with_slash`].

use serde_json::Value;

use crate::error::RouterSetupError;

/// Parameter converter selected by the `type:` prefix inside brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    Str,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param { name: String, converter: Converter },
}

/// Arguments extracted from a matched path, in pattern order.
pub type RouteArgs = Vec<(String, Value)>;

/// A parsed path pattern.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: String,
    segments: Vec<Segment>,
    trailing_slash: bool,
}

impl Rule {
    /// Parses a pattern string.
    ///
    /// Fails at setup time on anything malformed: missing leading slash,
    /// unterminated or partial parameter markers, unknown converters,
    /// empty parameter names.
    pub fn parse(pattern: &str) -> Result<Self, RouterSetupError> {
        if !pattern.starts_with('/') {
            return Err(RouterSetupError::invalid_rule(pattern, "pattern must start with '/'"));
        }
        let trailing_slash = pattern.len() > 1 && pattern.ends_with('/');
        let mut segments = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            let segment = if let Some(inner) = raw.strip_prefix('<') {
                let inner = inner
                    .strip_suffix('>')
                    .ok_or_else(|| RouterSetupError::invalid_rule(pattern, "unterminated parameter marker"))?;
                let (converter, name) = match inner.split_once(':') {
                    Some(("int", name)) => (Converter::Int, name),
                    Some(("string", name)) => (Converter::Str, name),
                    Some((other, _)) => {
                        return Err(RouterSetupError::invalid_rule(pattern, format!("unknown converter {other:?}")));
                    }
                    None => (Converter::Str, inner),
                };
                if name.is_empty() {
                    return Err(RouterSetupError::invalid_rule(pattern, "empty parameter name"));
                }
                Segment::Param { name: name.to_owned(), converter }
            } else if raw.contains('<') || raw.contains('>') {
                return Err(RouterSetupError::invalid_rule(pattern, "parameter marker must span a whole segment"));
            } else {
                Segment::Static(raw.to_owned())
            };
            segments.push(segment);
        }
        Ok(Self { pattern: pattern.to_owned(), segments, trailing_slash })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Matches a request path exactly, extracting typed arguments.
    ///
    /// Trailing-slash presence must agree between rule and path; no
    /// normalization happens here.
    pub fn match_path(&self, path: &str) -> Option<RouteArgs> {
        if !path.starts_with('/') {
            return None;
        }
        let trailing = path.len() > 1 && path.ends_with('/');
        if trailing != self.trailing_slash {
            return None;
        }
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut args = RouteArgs::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Static(expected) => {
                    if part != expected {
                        return None;
                    }
                }
                Segment::Param { name, converter: Converter::Int } => {
                    if !part.bytes().all(|b| b.is_ascii_digit()) {
                        return None;
                    }
                    let value = part.parse::<i64>().ok()?;
                    args.push((name.clone(), Value::from(value)));
                }
                Segment::Param { name, converter: Converter::Str } => {
                    args.push((name.clone(), Value::String(part.to_owned())));
                }
            }
        }
        Some(args)
    }

    /// Returns true when `path` would match this rule after appending the
    /// canonical trailing slash.
    pub fn matches_with_slash(&self, path: &str) -> bool {
        if !self.trailing_slash || path.ends_with('/') {
            return false;
        }
        let mut slashed = String::with_capacity(path.len() + 1);
        slashed.push_str(path);
        slashed.push('/');
        self.match_path(&slashed).is_some()
    }
}
