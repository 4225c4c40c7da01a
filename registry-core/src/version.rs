//! Semantic-version constraints
//!
//! A version constraint is `*`, `latest`, a bare version (exact match) or a
//! range such as `^1.0.0`, `~1.2`, `>= 1.0.0, < 2.0.0`, `!=1.1.0`, with `||`
//! separating alternatives. Anything unparsable matches nothing.

use semver::{Comparator, Version};

/// Characters that mark a name fragment as a range rather than a literal
pub const RANGE_MARKERS: [char; 6] = ['^', '~', '<', '>', '=', '!'];

/// Does a fragment describe a version range
pub fn is_range(fragment: &str) -> bool {
    fragment.contains(&RANGE_MARKERS[..])
}

/// Strict semver parse; `None` when invalid
pub fn parse_version(version: &str) -> Option<Version> {
    Version::parse(version.trim()).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Compare(Comparator),
    NotEqual(Version),
}

impl Term {
    fn parse(part: &str) -> Option<Self> {
        let compact: String = part.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return None;
        }
        if let Some(rest) = compact.strip_prefix("!=") {
            return parse_version(rest).map(Term::NotEqual);
        }
        if compact.starts_with(|c: char| c.is_ascii_digit()) {
            return Comparator::parse(&format!("={}", compact))
                .ok()
                .map(Term::Compare);
        }
        Comparator::parse(&compact).ok().map(Term::Compare)
    }

    fn matches(&self, version: &Version) -> bool {
        match self {
            Term::Compare(comparator) => comparator.matches(version),
            Term::NotEqual(excluded) => version != excluded,
        }
    }
}

/// Parsed range: alternatives of conjunctions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    alternatives: Vec<Vec<Term>>,
}

impl VersionRange {
    /// Parse a range expression
    pub fn parse(expr: &str) -> Option<Self> {
        let alternatives = expr
            .split("||")
            .map(|alternative| {
                alternative
                    .split(',')
                    .map(Term::parse)
                    .collect::<Option<Vec<Term>>>()
            })
            .collect::<Option<Vec<Vec<Term>>>>()?;
        Some(Self { alternatives })
    }

    /// Does `version` satisfy the range
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|terms| terms.iter().all(|term| term.matches(version)))
    }
}

/// A `version` query value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// `*`
    Any,
    /// `latest`: highest valid version per base name
    Latest,
    /// Bare version
    Exact(Version),
    /// Range expression
    Range(VersionRange),
}

impl VersionConstraint {
    /// Parse a constraint; `None` when it can never match
    pub fn parse(constraint: &str) -> Option<Self> {
        let constraint = constraint.trim();
        match constraint {
            "*" => Some(VersionConstraint::Any),
            "latest" => Some(VersionConstraint::Latest),
            _ => match parse_version(constraint) {
                Some(version) => Some(VersionConstraint::Exact(version)),
                None => VersionRange::parse(constraint).map(VersionConstraint::Range),
            },
        }
    }

    /// Does a record's `version` attribute satisfy the constraint
    ///
    /// `Latest` admits every valid version; the caller keeps the highest.
    pub fn admits(&self, version: &str) -> bool {
        let Some(parsed) = parse_version(version) else {
            return false;
        };
        match self {
            VersionConstraint::Any | VersionConstraint::Latest => true,
            VersionConstraint::Exact(expected) => &parsed == expected,
            VersionConstraint::Range(range) => range.matches(&parsed),
        }
    }
}
