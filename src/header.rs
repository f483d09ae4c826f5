// src/header.rs

//! In-memory package header
//!
//! A `Header` is the parsed metadata of one package, either read from an RPM
//! file or loaded from the installed-package database. The transaction layer
//! only looks at identity (NEVRA), dependencies, the file list and scriptlets.

use crate::version::{Evr, ranges_overlap};
use bitflags::bitflags;
use std::fmt;
use std::path::PathBuf;

bitflags! {
    /// Comparison sense of a dependency (same bit values as RPMSENSE_*)
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DepFlags: u32 {
        const LESS = 1 << 1;
        const GREATER = 1 << 2;
        const EQUAL = 1 << 3;
        const SENSE_MASK = Self::LESS.bits() | Self::GREATER.bits() | Self::EQUAL.bits();
    }
}

impl DepFlags {
    /// Comparison operator as written in spec files
    pub fn operator(&self) -> Option<&'static str> {
        let sense = *self & Self::SENSE_MASK;
        if sense == Self::LESS {
            Some("<")
        } else if sense == Self::LESS | Self::EQUAL {
            Some("<=")
        } else if sense == Self::EQUAL {
            Some("=")
        } else if sense == Self::GREATER | Self::EQUAL {
            Some(">=")
        } else if sense == Self::GREATER {
            Some(">")
        } else {
            None
        }
    }
}

/// One provides/requires/conflicts entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub flags: DepFlags,
    pub version: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, flags: DepFlags, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: flags & DepFlags::SENSE_MASK,
            version: version.into(),
        }
    }

    /// Unversioned dependency on `name`
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, DepFlags::empty(), "")
    }

    /// Internal rpm capabilities that are never provided by packages
    pub fn is_rpmlib(&self) -> bool {
        self.name.starts_with("rpmlib(")
    }

    /// Dependency on a file path rather than a capability
    pub fn is_file(&self) -> bool {
        self.name.starts_with('/')
    }

    /// Does `provide` satisfy this dependency?
    pub fn matched_by(&self, provide: &Dependency) -> bool {
        self.name == provide.name
            && ranges_overlap(provide.flags, &provide.version, self.flags, &self.version)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.flags.operator() {
            Some(op) if !self.version.is_empty() => {
                write!(f, "{} {} {}", self.name, op, self.version)
            }
            _ => write!(f, "{}", self.name),
        }
    }
}

/// File type bits of a mode
pub(crate) const S_IFMT: u32 = 0o170000;
pub(crate) const S_IFDIR: u32 = 0o040000;
pub(crate) const S_IFLNK: u32 = 0o120000;

/// A file listed in a package header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFile {
    pub path: String,
    pub mode: u32,
    pub size: u64,
    /// Hex digest as recorded in the header (empty for directories and links)
    pub digest: String,
}

impl HeaderFile {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits including setuid/setgid/sticky
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Kind of package scriptlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptletKind {
    PreInstall,
    PostInstall,
    PreUninstall,
    PostUninstall,
}

impl ScriptletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptletKind::PreInstall => "pre",
            ScriptletKind::PostInstall => "post",
            ScriptletKind::PreUninstall => "preun",
            ScriptletKind::PostUninstall => "postun",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "pre" => Some(ScriptletKind::PreInstall),
            "post" => Some(ScriptletKind::PostInstall),
            "preun" => Some(ScriptletKind::PreUninstall),
            "postun" => Some(ScriptletKind::PostUninstall),
            _ => None,
        }
    }

    /// Failure of this scriptlet aborts the element
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScriptletKind::PreInstall | ScriptletKind::PreUninstall)
    }
}

impl fmt::Display for ScriptletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.as_str())
    }
}

/// Scriptlet bodies carried by a header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scriptlets {
    pub pre: Option<String>,
    pub post: Option<String>,
    pub preun: Option<String>,
    pub postun: Option<String>,
}

impl Scriptlets {
    pub fn get(&self, kind: ScriptletKind) -> Option<&str> {
        match kind {
            ScriptletKind::PreInstall => self.pre.as_deref(),
            ScriptletKind::PostInstall => self.post.as_deref(),
            ScriptletKind::PreUninstall => self.preun.as_deref(),
            ScriptletKind::PostUninstall => self.postun.as_deref(),
        }
    }

    pub fn set(&mut self, kind: ScriptletKind, body: String) {
        let slot = match kind {
            ScriptletKind::PreInstall => &mut self.pre,
            ScriptletKind::PostInstall => &mut self.post,
            ScriptletKind::PreUninstall => &mut self.preun,
            ScriptletKind::PostUninstall => &mut self.postun,
        };
        *slot = Some(body);
    }

    /// Present scriptlets with their kind
    pub fn iter(&self) -> impl Iterator<Item = (ScriptletKind, &str)> {
        [
            ScriptletKind::PreInstall,
            ScriptletKind::PostInstall,
            ScriptletKind::PreUninstall,
            ScriptletKind::PostUninstall,
        ]
        .into_iter()
        .filter_map(move |kind| self.get(kind).map(|body| (kind, body)))
    }
}

/// Where a header was read from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderOrigin {
    /// Package file on disk (canonical path)
    File(PathBuf),
    /// Row of the installed-package database
    Installed(u32),
}

/// Parsed package metadata
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub provides: Vec<Dependency>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub files: Vec<HeaderFile>,
    pub scripts: Scriptlets,
    /// SHA-256 of the package file, when computed
    pub pkgid: Option<String>,
    pub origin: HeaderOrigin,
}

impl Header {
    pub fn evr(&self) -> Evr {
        Evr::new(self.epoch, self.version.clone(), Some(self.release.clone()))
    }

    /// `name-[epoch:]version-release.arch`
    pub fn nevra(&self) -> String {
        format!("{}-{}.{}", self.name, self.evr(), self.arch)
    }

    /// Database row id for installed headers
    pub fn db_id(&self) -> Option<u32> {
        match self.origin {
            HeaderOrigin::Installed(id) => Some(id),
            HeaderOrigin::File(_) => None,
        }
    }

    /// Same name, epoch, version, release and arch
    pub fn same_nevra(&self, other: &Header) -> bool {
        self.name == other.name
            && self.epoch.unwrap_or(0) == other.epoch.unwrap_or(0)
            && self.version == other.version
            && self.release == other.release
            && self.arch == other.arch
    }

    /// Add the implicit `name = [epoch:]version-release` provide if the
    /// package doesn't carry it already
    pub fn ensure_self_provide(&mut self) {
        let evr = self.evr();
        let present = self.provides.iter().any(|p| {
            p.name == self.name
                && p.flags == DepFlags::EQUAL
                && Evr::parse(&p.version).compare(&evr).is_eq()
        });
        if !present {
            self.provides.push(Dependency::new(
                self.name.clone(),
                DepFlags::EQUAL,
                evr.to_string(),
            ));
        }
    }

    /// Does this package satisfy `dep`, by capability or by owned file?
    pub fn satisfies(&self, dep: &Dependency) -> bool {
        if self.provides.iter().any(|p| dep.matched_by(p)) {
            return true;
        }
        dep.is_file() && self.owns_file(&dep.name)
    }

    pub fn owns_file(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    /// Total payload size used as the progress total for installs
    pub fn payload_size(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| !f.is_dir())
            .map(|f| f.size)
            .sum()
    }
}
