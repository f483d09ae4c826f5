// src/problem.rs

//! Verification problems
//!
//! `check()` and the preparation step of `run()` report what is wrong with a
//! transaction as a [`ProblemSet`]. Each set owns its records; a [`Problem`]
//! borrows from its set and cannot outlive it.

use crate::ts::ElementKey;
use std::fmt;
use std::iter::FusedIterator;

/// Kind of verification failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemKind {
    /// Package built for an architecture this host can't run
    BadArch,
    /// Plain install of a package that is already installed
    PkgInstalled,
    /// Unsatisfied requirement
    Requires,
    /// Conflict between two packages
    Conflict,
    /// Two packages in the transaction ship the same file differently
    NewFileConflict,
    /// A package in the transaction replaces a file of an installed package
    FileConflict,
    /// Upgrade to an older version than the installed one
    OldPackage,
}

/// One problem, as produced by the transaction set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemRecord {
    pub kind: ProblemKind,
    /// NEVRA of the package the problem is reported for
    pub package: String,
    /// Dependency text, other package or architecture, depending on kind
    pub alt: String,
    /// File path for file conflicts
    pub path: Option<String>,
    /// Element the problem belongs to, if it is an element of the set
    pub key: Option<ElementKey>,
}

impl ProblemRecord {
    pub fn new(kind: ProblemKind, package: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            kind,
            package: package.into(),
            alt: alt.into(),
            path: None,
            key: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_key(mut self, key: Option<ElementKey>) -> Self {
        self.key = key;
        self
    }
}

impl fmt::Display for ProblemRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.as_deref().unwrap_or("");
        match self.kind {
            ProblemKind::BadArch => write!(
                f,
                "package {} is intended for a {} architecture",
                self.package, self.alt
            ),
            ProblemKind::PkgInstalled => {
                write!(f, "package {} is already installed", self.package)
            }
            ProblemKind::Requires => write!(f, "{} is needed by {}", self.alt, self.package),
            ProblemKind::Conflict => write!(f, "{} conflicts with {}", self.alt, self.package),
            ProblemKind::NewFileConflict => write!(
                f,
                "file {} conflicts between attempted installs of {} and {}",
                path, self.package, self.alt
            ),
            ProblemKind::FileConflict => write!(
                f,
                "file {} from install of {} conflicts with file from package {}",
                path, self.package, self.alt
            ),
            ProblemKind::OldPackage => write!(
                f,
                "package {} (which is newer than {}) is already installed",
                self.alt, self.package
            ),
        }
    }
}

/// Problems found by one `check()` or `run()`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemSet {
    records: Vec<ProblemRecord>,
}

impl ProblemSet {
    pub fn new(records: Vec<ProblemRecord>) -> Self {
        Self { records }
    }

    /// Number of problems in the set
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forward-only cursor over the problems
    pub fn iter(&self) -> ProblemIter<'_> {
        if self.records.is_empty() {
            ProblemIter::exhausted()
        } else {
            ProblemIter {
                set: Some(self),
                pos: 0,
            }
        }
    }
}

impl FromIterator<ProblemRecord> for ProblemSet {
    fn from_iter<I: IntoIterator<Item = ProblemRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ProblemSet {
    type Item = Problem<'a>;
    type IntoIter = ProblemIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A problem borrowed from its [`ProblemSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Problem<'a> {
    record: &'a ProblemRecord,
}

impl<'a> Problem<'a> {
    pub fn kind(&self) -> ProblemKind {
        self.record.kind
    }

    pub fn package(&self) -> &'a str {
        &self.record.package
    }

    pub fn alt(&self) -> &'a str {
        &self.record.alt
    }

    pub fn path(&self) -> Option<&'a str> {
        self.record.path.as_deref()
    }

    pub fn key(&self) -> Option<ElementKey> {
        self.record.key
    }

    pub fn record(&self) -> &'a ProblemRecord {
        self.record
    }
}

impl fmt::Display for Problem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.record.fmt(f)
    }
}

/// Single-pass cursor over a [`ProblemSet`]
///
/// Equality is position equality while the cursor is live. Every exhausted
/// cursor compares equal to every other exhausted cursor, whatever set it
/// came from: exhaustion is a sentinel, not a position.
#[derive(Debug, Clone)]
pub struct ProblemIter<'a> {
    set: Option<&'a ProblemSet>,
    pos: usize,
}

impl<'a> ProblemIter<'a> {
    /// The exhaustion sentinel
    pub fn exhausted() -> Self {
        Self { set: None, pos: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.set.is_none()
    }
}

impl<'a> Iterator for ProblemIter<'a> {
    type Item = Problem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let set = self.set?;
        let record = set.records.get(self.pos)?;
        self.pos += 1;
        if self.pos >= set.records.len() {
            self.set = None;
            self.pos = 0;
        }
        Some(Problem { record })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.set.map_or(0, |set| set.records.len() - self.pos);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ProblemIter<'_> {}

impl FusedIterator for ProblemIter<'_> {}

impl PartialEq for ProblemIter<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self.set, other.set) {
            (None, None) => true,
            (Some(a), Some(b)) => std::ptr::eq(a, b) && self.pos == other.pos,
            _ => false,
        }
    }
}

impl Eq for ProblemIter<'_> {}
