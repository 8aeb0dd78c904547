//! Key patterns for invalidation
//!
//! A pattern is a `:`-separated list of segments. A `*` segment in the
//! middle matches exactly one key segment; a trailing `*` matches one or
//! more remaining segments. Every other segment matches literally.

use crate::error::CacheError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// Parsed invalidation pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl KeyPattern {
    /// Parse a pattern
    ///
    /// # Errors
    /// Empty patterns and patterns with empty segments.
    pub fn parse(raw: &str) -> Result<Self, CacheError> {
        if raw.is_empty() {
            return Err(CacheError::InvalidPattern(raw.to_string()));
        }
        let segments = raw
            .split(':')
            .map(|s| match s {
                "" => Err(CacheError::InvalidPattern(raw.to_string())),
                "*" => Ok(Segment::Any),
                literal => Ok(Segment::Literal(literal.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Pattern text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `key` matches
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        let parts: Vec<&str> = key.split(':').collect();
        let last = self.segments.len() - 1;
        let trailing_any = matches!(self.segments[last], Segment::Any);

        if trailing_any {
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        self.segments.iter().zip(&parts).all(|(seg, part)| match seg {
            Segment::Any => !part.is_empty(),
            Segment::Literal(lit) => lit == part,
        })
    }

    /// Literal leading segments, used to skip unrelated keys cheaply
    #[must_use]
    pub fn literal_prefix(&self) -> String {
        let literals: Vec<&str> = self
            .segments
            .iter()
            .map_while(|seg| match seg {
                Segment::Literal(lit) => Some(lit.as_str()),
                Segment::Any => None,
            })
            .collect();
        literals.join(":")
    }
}

impl FromStr for KeyPattern {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(raw: &str) -> KeyPattern {
        KeyPattern::parse(raw).unwrap()
    }

    #[test]
    fn interior_wildcard_is_one_segment() {
        let pattern = p("products:detail:*:anon");
        assert!(pattern.matches("products:detail:notes:anon"));
        assert!(!pattern.matches("products:detail:notes:u_1"));
        assert!(!pattern.matches("products:detail:a:b:anon"));
    }

    #[test]
    fn trailing_wildcard_spans_the_rest() {
        let pattern = p("recommendations:*");
        assert!(pattern.matches("recommendations:trending:anon:10:0"));
        assert!(pattern.matches("recommendations:x"));
        assert!(!pattern.matches("recommendations"));
        assert!(!pattern.matches("rec:trending:h:anon:10:0"));
    }

    #[test]
    fn detail_pattern_for_slug() {
        let pattern = p("products:detail:notes:*");
        assert!(pattern.matches("products:detail:notes:anon"));
        assert!(pattern.matches("products:detail:notes:u_7"));
        assert!(!pattern.matches("products:detail:notes-pro:anon"));
    }

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(p("a:b").matches("a:b"));
        assert!(!p("a:b").matches("a:b:c"));
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(KeyPattern::parse("").is_err());
        assert!(KeyPattern::parse("a::b").is_err());
        assert!(KeyPattern::parse(":a").is_err());
    }

    #[test]
    fn literal_prefix() {
        assert_eq!(p("products:detail:*:x").literal_prefix(), "products:detail");
        assert_eq!(p("*:x").literal_prefix(), "");
    }

    proptest! {
        #[test]
        fn key_matches_itself_and_its_prefix_wildcard(
            segs in prop::collection::vec("[a-z0-9_]{1,6}", 2..6)
        ) {
            let key = segs.join(":");
            prop_assert!(p(&key).matches(&key));
            let wildcard = format!("{}:*", segs[0]);
            prop_assert!(p(&wildcard).matches(&key));
            let mut one_star = segs.clone();
            one_star[1] = "*".to_string();
            prop_assert!(p(&one_star.join(":")).matches(&key));
        }
    }
}
