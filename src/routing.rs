// Copyright (C) 2026 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of biblioteca.
//
// biblioteca is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// biblioteca is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with biblioteca.  If not,
// see <http://www.gnu.org/licenses/>.

//! # routing
//!
//! Path-pattern matching with typed parameter extraction, and the ordered route table built on
//! it.
//!
//! A route template is a sequence of `/`-separated segments, each either a literal or a
//! placeholder of the form `<converter:name>` (or just `<name>`, in which case the converter
//! defaults to `str`). Leading & trailing slashes are ignored on both sides, so `/a/b/` and
//! `a/b` normalize identically. Matching is single-pass with no backtracking: segment counts
//! must agree exactly, literals must match byte-for-byte (case-sensitively), and a placeholder
//! whose converter rejects the request segment fails the *whole* match, not just that segment.
//!
//! The route table is deliberately first-match-wins, not best-match: registration order is part
//! of the contract.

use std::fmt::Display;

use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{converter} is not a recognized path converter"))]
    BadConverter { converter: String },
    #[snafu(display("Empty placeholder in route template {template}"))]
    EmptyPlaceholder { template: String },
    #[snafu(display("No route matches {path}"))]
    NoRouteMatch { path: String },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       pattern matching                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// How a placeholder segment coerces the corresponding request segment
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Converter {
    /// Pass the segment through unmodified
    Str,
    /// Decimal digits only; coerced to an integer
    Int,
    /// Historical alias for [Converter::Int] (the original schema used `slug` for numeric
    /// segments; kept for template compatibility)
    Slug,
}

impl Converter {
    fn parse(text: &str) -> Result<Converter> {
        match text {
            "str" => Ok(Converter::Str),
            "int" => Ok(Converter::Int),
            "slug" => Ok(Converter::Slug),
            _ => BadConverterSnafu { converter: text }.fail(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder { name: String, converter: Converter },
}

/// A parameter value extracted during a match attempt
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(u64),
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::Int(i) => write!(f, "{}", i),
        }
    }
}

/// The parameter mapping produced by a successful match, in pattern-declaration order
///
/// Order isn't semantically significant, but keeping it deterministic makes the thing testable.
/// Recomputed per match attempt; never retained between requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathArgs(Vec<(String, ParamValue)>);

impl PathArgs {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }
    /// Convenience accessor for `int`-converted parameters
    pub fn int(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(ParamValue::Int(i)) => Some(*i),
            _ => None,
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = &(String, ParamValue)> {
        self.0.iter()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    // Two placeholders declaring the same name in one pattern is unspecified upstream; we go
    // with first-write-wins, which at least is deterministic.
    fn insert(&mut self, name: &str, value: ParamValue) {
        if self.get(name).is_none() {
            self.0.push((name.to_owned(), value));
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// A parsed route template
#[derive(Clone, Debug)]
pub struct Pattern {
    template: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(template: &str) -> Result<Pattern> {
        let segments = split_path(template)
            .into_iter()
            .map(|seg| {
                if let Some(inner) = seg
                    .strip_prefix('<')
                    .and_then(|s| s.strip_suffix('>'))
                {
                    let (converter, name) = match inner.split_once(':') {
                        Some((conv, name)) => (Converter::parse(conv)?, name),
                        None => (Converter::Str, inner),
                    };
                    ensure!(!name.is_empty(), EmptyPlaceholderSnafu { template });
                    Ok(Segment::Placeholder {
                        name: name.to_owned(),
                        converter,
                    })
                } else {
                    Ok(Segment::Literal(seg.to_owned()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Pattern {
            template: template.to_owned(),
            segments,
        })
    }
    /// Attempt to match `path`; `Some` carries the extracted parameters
    pub fn matches(&self, path: &str) -> Option<PathArgs> {
        let segments = split_path(path);
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut args = PathArgs::default();
        for (pattern_seg, request_seg) in self.segments.iter().zip(segments) {
            match pattern_seg {
                Segment::Literal(lit) => {
                    if lit != request_seg {
                        return None;
                    }
                }
                Segment::Placeholder {
                    name,
                    converter: Converter::Str,
                } => args.insert(name, ParamValue::Str(request_seg.to_owned())),
                Segment::Placeholder { name, .. } => {
                    if request_seg.is_empty()
                        || !request_seg.bytes().all(|b| b.is_ascii_digit())
                    {
                        return None;
                    }
                    let value = request_seg.parse::<u64>().ok()?;
                    args.insert(name, ParamValue::Int(value));
                }
            }
        }
        Some(args)
    }
    pub fn template(&self) -> &str {
        &self.template
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          route table                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A registered route: template, handler & optional name
///
/// Routes are registered once at startup & never mutated thereafter.
#[derive(Clone, Debug)]
pub struct Route<H> {
    pub pattern: Pattern,
    pub handler: H,
    pub name: Option<String>,
}

/// An ordered route table, generic over the handler type
#[derive(Clone, Debug, Default)]
pub struct Router<H> {
    routes: Vec<Route<H>>,
}

impl<H> Router<H> {
    pub fn new() -> Router<H> {
        Router { routes: Vec::new() }
    }
    /// Register a route; panics on a malformed template, which is appropriate for the static
    /// tables this type is built for (a bad template is a programming error, not a runtime
    /// condition)
    pub fn route(mut self, template: &str, handler: H, name: &str) -> Router<H> {
        let pattern = Pattern::parse(template).unwrap_or_else(|err| {
            panic!("bad route template {:?}: {}", template, err)
        });
        self.routes.push(Route {
            pattern,
            handler,
            name: Some(name.to_owned()),
        });
        self
    }
    /// Resolve `path` to the first registered route that matches it
    pub fn resolve(&self, path: &str) -> Result<(&Route<H>, PathArgs)> {
        self.routes
            .iter()
            .find_map(|route| route.pattern.matches(path).map(|args| (route, args)))
            .context(NoRouteMatchSnafu { path })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn literal_patterns() {
        let p = Pattern::parse("/api/health/").unwrap();
        assert!(p.matches("/api/health/").is_some());
        assert!(p.matches("api/health").is_some());
        assert!(p.matches("/api/health/extra/").is_none());
        assert!(p.matches("/api/Health/").is_none()); // case-sensitive
        assert!(p.matches("/api/").is_none());
    }

    #[test]
    fn int_placeholders() {
        let p = Pattern::parse("/api/books/<int:book_id>/").unwrap();
        let args = p.matches("/api/books/42/").unwrap();
        assert_eq!(args.int("book_id"), Some(42));
        // A non-numeric segment fails the whole match
        assert!(p.matches("/api/books/abc/").is_none());
        assert!(p.matches("/api/books/4x2/").is_none());
        assert!(p.matches("/api/books/-1/").is_none());
    }

    #[test]
    fn str_and_default_placeholders() {
        let p = Pattern::parse("/tags/<str:tag>/by/<who>/").unwrap();
        let args = p.matches("/tags/rust/by/sp1ff/").unwrap();
        assert_eq!(
            args.get("tag"),
            Some(&ParamValue::Str("rust".to_owned()))
        );
        assert_eq!(
            args.get("who"),
            Some(&ParamValue::Str("sp1ff".to_owned()))
        );
        // Declaration order is preserved
        let names: Vec<&str> = args.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["tag", "who"]);
    }

    #[test]
    fn slug_is_numeric() {
        let p = Pattern::parse("/api/items/<slug:item>/").unwrap();
        assert_eq!(p.matches("/api/items/7/").unwrap().int("item"), Some(7));
        assert!(p.matches("/api/items/seven/").is_none());
    }

    #[test]
    fn bad_templates() {
        assert!(matches!(
            Pattern::parse("/x/<uuid:id>/"),
            Err(Error::BadConverter { .. })
        ));
        assert!(matches!(
            Pattern::parse("/x/<int:>/"),
            Err(Error::EmptyPlaceholder { .. })
        ));
    }

    #[test]
    fn duplicate_names_first_write_wins() {
        let p = Pattern::parse("/p/<int:id>/<int:id>/").unwrap();
        let args = p.matches("/p/1/2/").unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args.int("id"), Some(1));
    }

    #[test]
    fn first_match_wins() {
        let router: Router<u32> = Router::new()
            .route("/api/books/", 0, "books-list")
            .route("/api/books/<int:book_id>/", 1, "books-detail")
            .route("/api/<str:anything>/", 2, "catch-one");
        let (route, _) = router.resolve("/api/books/").unwrap();
        assert_eq!(route.handler, 0);
        let (route, args) = router.resolve("/api/books/3/").unwrap();
        assert_eq!(route.handler, 1);
        assert_eq!(args.int("book_id"), Some(3));
        // The collection route registered first beat `catch-one` above; a path only the
        // catch-all matches still resolves
        let (route, _) = router.resolve("/api/health/").unwrap();
        assert_eq!(route.handler, 2);
        assert!(matches!(
            router.resolve("/nope/"),
            Err(Error::NoRouteMatch { .. })
        ));
    }
}
