//! Named path filters and the change sets they produce

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, ordered list of glob patterns
///
/// Patterns use `globset` syntax with literal separators: `*` stays inside
/// one path component and `**` crosses directories.
#[derive(Debug, Clone)]
pub struct PathFilter {
    name: String,
    patterns: Vec<String>,
    set: GlobSet,
}

impl PathFilter {
    pub fn new(name: impl Into<String>, patterns: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(compile_glob(pattern)?);
        }

        Ok(Self {
            name: name.into(),
            patterns: patterns.to_vec(),
            set: builder.build()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, path: &str) -> bool {
        self.set.is_match(path)
    }

    /// True if any of `paths` matches any pattern
    pub fn matches_any<'a, I>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().any(|p| self.matches(p))
    }
}

pub(crate) fn compile_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// All filters declared on one change detection job
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<PathFilter>,
}

impl FilterSet {
    pub fn compile(filters: &BTreeMap<String, Vec<String>>) -> Result<Self, globset::Error> {
        let filters = filters
            .iter()
            .map(|(name, patterns)| PathFilter::new(name.clone(), patterns))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathFilter> {
        self.filters.iter()
    }

    /// Evaluate every filter against a set of changed paths
    pub fn evaluate(&self, paths: &[String]) -> BTreeMap<String, bool> {
        self.filters
            .iter()
            .map(|f| (f.name().to_string(), f.matches_any(paths.iter().map(String::as_str))))
            .collect()
    }
}

/// Where the diff base came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffBase {
    /// The requested base ref resolved to a distinct commit
    Requested { sha: String },
    /// Fell back to the head's first parent
    Parent { sha: String },
    /// Head has no parent; every tracked file counts as changed
    EmptyTree,
}

impl DiffBase {
    pub fn sha(&self) -> Option<&str> {
        match self {
            DiffBase::Requested { sha } | DiffBase::Parent { sha } => Some(sha),
            DiffBase::EmptyTree => None,
        }
    }
}

/// Result of one change detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub base: DiffBase,
    pub head: String,
    pub paths: Vec<String>,
    pub flags: BTreeMap<String, bool>,
}

impl ChangeSet {
    /// Value of a named flag; `None` if no filter with that name exists
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    pub fn any(&self) -> bool {
        self.flags.values().any(|v| *v)
    }
}
