// src/packages/mod.rs

//! Package references handed to the transaction engine
//!
//! A `PackageRef` identifies one resolvable unit: its NEVRA plus where the
//! engine can find its header (a local RPM file, or a row in the
//! installed-package database).

pub mod rpm;

use crate::error::Result;
use crate::header::Header;
use crate::ts::VerifyFlags;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name, epoch, version, release, architecture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nevra {
    pub name: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    pub fn new(
        name: impl Into<String>,
        epoch: Option<u32>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            epoch,
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
        }
    }
}

impl From<&Header> for Nevra {
    fn from(header: &Header) -> Self {
        Self::new(
            header.name.clone(),
            header.epoch,
            header.version.clone(),
            header.release.clone(),
            header.arch.clone(),
        )
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.name)?;
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        write!(f, "{}-{}.{}", self.version, self.release, self.arch)
    }
}

/// Where the header of a package can be read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLocation {
    /// RPM file on the local filesystem (install, upgrade, reinstall)
    LocalPath(PathBuf),
    /// Row id in the installed-package database (erase)
    Installed(u32),
}

/// Immutable handle to one package, as produced by a resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    nevra: Nevra,
    location: PackageLocation,
}

impl PackageRef {
    /// Package available as a local RPM file
    pub fn local(nevra: Nevra, path: impl Into<PathBuf>) -> Self {
        Self {
            nevra,
            location: PackageLocation::LocalPath(path.into()),
        }
    }

    /// Package already present in the installed-package database
    pub fn installed(nevra: Nevra, db_id: u32) -> Self {
        Self {
            nevra,
            location: PackageLocation::Installed(db_id),
        }
    }

    /// Build a reference by reading the NEVRA from an RPM file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let header = rpm::read_header(path, VerifyFlags::NODIGESTS)?;
        Ok(Self::local(Nevra::from(&header), path))
    }

    pub fn nevra(&self) -> &Nevra {
        &self.nevra
    }

    pub fn name(&self) -> &str {
        &self.nevra.name
    }

    pub fn location(&self) -> &PackageLocation {
        &self.location
    }

    /// Local file path, if this package is read from a file
    pub fn local_path(&self) -> Option<&Path> {
        match &self.location {
            PackageLocation::LocalPath(path) => Some(path),
            PackageLocation::Installed(_) => None,
        }
    }

    /// Installed-package database id, if this package is installed
    pub fn db_id(&self) -> Option<u32> {
        match self.location {
            PackageLocation::Installed(id) => Some(id),
            PackageLocation::LocalPath(_) => None,
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.nevra.fmt(f)
    }
}
