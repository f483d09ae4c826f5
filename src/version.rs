// src/version.rs

//! RPM version comparison
//!
//! Implements rpm's segment-wise `rpmvercmp`, epoch:version-release ordering
//! and the range-overlap test used to match a requirement against a provide.

use crate::header::DepFlags;
use std::cmp::Ordering;
use std::fmt;

/// Compare two version (or release) strings the way rpm does
///
/// Strings are split into alternating numeric and alphabetic segments.
/// Numeric segments compare numerically and beat alphabetic ones, `~` sorts
/// before anything (even the end of the string) and `^` sorts after the end
/// of the string but before any further segment.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    let is_sep = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    while i < one.len() || j < two.len() {
        while i < one.len() && is_sep(one[i]) {
            i += 1;
        }
        while j < two.len() && is_sep(two[j]) {
            j += 1;
        }

        // Tilde sorts before everything else
        if one.get(i) == Some(&b'~') || two.get(j) == Some(&b'~') {
            if one.get(i) != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.get(j) != Some(&b'~') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        // Caret sorts after the end of the string but before anything else
        if one.get(i) == Some(&b'^') || two.get(j) == Some(&b'^') {
            if i >= one.len() {
                return Ordering::Less;
            }
            if j >= two.len() {
                return Ordering::Greater;
            }
            if one[i] != b'^' {
                return Ordering::Greater;
            }
            if two[j] != b'^' {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if i >= one.len() || j >= two.len() {
            break;
        }

        let numeric = one[i].is_ascii_digit();
        let take = |s: &[u8], start: usize| -> usize {
            let mut end = start;
            while end < s.len()
                && (if numeric {
                    s[end].is_ascii_digit()
                } else {
                    s[end].is_ascii_alphabetic()
                })
            {
                end += 1;
            }
            end
        };

        let end_one = take(one, i);
        let end_two = take(two, j);
        let mut seg_one = &one[i..end_one];
        let mut seg_two = &two[j..end_two];

        // Segments of different types: numeric is newer
        if seg_two.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        if numeric {
            while seg_one.first() == Some(&b'0') {
                seg_one = &seg_one[1..];
            }
            while seg_two.first() == Some(&b'0') {
                seg_two = &seg_two[1..];
            }
            match seg_one.len().cmp(&seg_two.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        match seg_one.cmp(seg_two) {
            Ordering::Equal => {}
            other => return other,
        }

        i = end_one;
        j = end_two;
    }

    match (i >= one.len(), j >= two.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

/// An epoch:version-release triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evr {
    pub epoch: Option<u32>,
    pub version: String,
    pub release: Option<String>,
}

impl Evr {
    pub fn new(epoch: Option<u32>, version: impl Into<String>, release: Option<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release,
        }
    }

    /// Parse `[epoch:]version[-release]`
    ///
    /// A non-numeric epoch prefix is treated as part of the version.
    pub fn parse(s: &str) -> Self {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) => match e.parse::<u32>() {
                Ok(epoch) => (Some(epoch), rest),
                Err(_) => (None, s),
            },
            None => (None, s),
        };

        match rest.rsplit_once('-') {
            Some((version, release)) => Self::new(epoch, version, Some(release.to_string())),
            None => Self::new(epoch, rest, None),
        }
    }

    /// Compare two EVRs; a missing epoch counts as 0 and the release is only
    /// compared when both sides have one
    pub fn compare(&self, other: &Evr) -> Ordering {
        let epoch = self.epoch.unwrap_or(0).cmp(&other.epoch.unwrap_or(0));
        if epoch != Ordering::Equal {
            return epoch;
        }

        let version = rpmvercmp(&self.version, &other.version);
        if version != Ordering::Equal {
            return version;
        }

        match (&self.release, &other.release) {
            (Some(a), Some(b)) => rpmvercmp(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(release) = &self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

/// Do the ranges described by a provide and a requirement overlap?
///
/// A side without a comparison operator or without a version matches any
/// version of the other side.
pub fn ranges_overlap(
    provide_flags: DepFlags,
    provide_evr: &str,
    require_flags: DepFlags,
    require_evr: &str,
) -> bool {
    let a = provide_flags & DepFlags::SENSE_MASK;
    let b = require_flags & DepFlags::SENSE_MASK;

    if a.is_empty() || b.is_empty() || provide_evr.is_empty() || require_evr.is_empty() {
        return true;
    }

    match Evr::parse(provide_evr).compare(&Evr::parse(require_evr)) {
        Ordering::Less => a.contains(DepFlags::GREATER) || b.contains(DepFlags::LESS),
        Ordering::Greater => a.contains(DepFlags::LESS) || b.contains(DepFlags::GREATER),
        Ordering::Equal => {
            (a.contains(DepFlags::EQUAL) && b.contains(DepFlags::EQUAL))
                || (a.contains(DepFlags::LESS) && b.contains(DepFlags::LESS))
                || (a.contains(DepFlags::GREATER) && b.contains(DepFlags::GREATER))
        }
    }
}
