// src/db/models.rs

//! Data models for the installed-package database
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading and deleting records, plus
//! helpers that store and load a complete `Header`.

use crate::error::Result;
use crate::header::{DepFlags, Dependency, Header, HeaderFile, HeaderOrigin, ScriptletKind};
use crate::packages::Nevra;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Convert a SQLite row id to the `u32` database id used by package references
pub fn to_db_id(id: i64) -> Result<u32> {
    u32::try_from(id).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(0, id).into())
}

/// An installed package row
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub name: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub pkgid: Option<String>,
    pub install_tid: u32,
    pub installed_at: Option<String>,
}

const PACKAGE_COLUMNS: &str =
    "id, name, epoch, version, release, arch, pkgid, install_tid, installed_at";

impl InstalledPackage {
    /// Create a row for a header installed by transaction `install_tid`
    pub fn from_header(header: &Header, install_tid: u32) -> Self {
        Self {
            id: None,
            name: header.name.clone(),
            epoch: header.epoch,
            version: header.version.clone(),
            release: header.release.clone(),
            arch: header.arch.clone(),
            pkgid: header.pkgid.clone(),
            install_tid,
            installed_at: None,
        }
    }

    pub fn nevra(&self) -> Nevra {
        Nevra::new(
            self.name.clone(),
            self.epoch,
            self.version.clone(),
            self.release.clone(),
            self.arch.clone(),
        )
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, epoch, version, release, arch, pkgid, install_tid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &self.name,
                &self.epoch,
                &self.version,
                &self.release,
                &self.arch,
                &self.pkgid,
                &self.install_tid,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a package by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE id = ?1",
            PACKAGE_COLUMNS
        ))?;

        let package = stmt.query_row([id], Self::from_row).optional()?;

        Ok(package)
    }

    /// Find packages by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1 ORDER BY id",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// List all installed packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY name, id",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete a package by ID; dependencies, files and scriptlets cascade
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Convert a database row to an InstalledPackage
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            epoch: row.get(2)?,
            version: row.get(3)?,
            release: row.get(4)?,
            arch: row.get(5)?,
            pkgid: row.get(6)?,
            install_tid: row.get(7)?,
            installed_at: row.get(8)?,
        })
    }
}

/// Kind of dependency row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Provides,
    Requires,
    Conflicts,
}

impl DependencyKind {
    pub fn as_str(&self) -> &str {
        match self {
            DependencyKind::Provides => "provides",
            DependencyKind::Requires => "requires",
            DependencyKind::Conflicts => "conflicts",
        }
    }
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "provides" => Ok(DependencyKind::Provides),
            "requires" => Ok(DependencyKind::Requires),
            "conflicts" => Ok(DependencyKind::Conflicts),
            _ => Err(format!("Invalid dependency kind: {}", s)),
        }
    }
}

/// A provides/requires/conflicts row
#[derive(Debug, Clone)]
pub struct DependencyEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub kind: DependencyKind,
    pub name: String,
    pub flags: u32,
    pub version: String,
}

impl DependencyEntry {
    pub fn new(package_id: i64, kind: DependencyKind, dep: &Dependency) -> Self {
        Self {
            id: None,
            package_id,
            kind,
            name: dep.name.clone(),
            flags: dep.flags.bits(),
            version: dep.version.clone(),
        }
    }

    /// Insert this dependency into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO dependencies (package_id, kind, name, flags, version)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.package_id,
                self.kind.as_str(),
                &self.name,
                &self.flags,
                &self.version,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all dependencies of a package
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, kind, name, flags, version
             FROM dependencies WHERE package_id = ?1 ORDER BY id",
        )?;

        let deps = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(deps)
    }

    pub fn to_dependency(&self) -> Dependency {
        Dependency::new(
            self.name.clone(),
            DepFlags::from_bits_truncate(self.flags),
            self.version.clone(),
        )
    }

    /// Convert a database row to a DependencyEntry
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(2)?;
        let kind = kind_str.parse::<DependencyKind>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            kind,
            name: row.get(3)?,
            flags: row.get(4)?,
            version: row.get(5)?,
        })
    }
}

/// A file owned by an installed package
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub path: String,
    pub mode: u32,
    pub size: i64,
    pub digest: String,
}

impl FileEntry {
    pub fn new(package_id: i64, file: &HeaderFile) -> Self {
        Self {
            id: None,
            package_id,
            path: file.path.clone(),
            mode: file.mode,
            size: file.size as i64,
            digest: file.digest.clone(),
        }
    }

    /// Insert this file into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO files (package_id, path, mode, size, digest)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.package_id,
                &self.path,
                &self.mode,
                &self.size,
                &self.digest,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find every package's entry for a path
    pub fn find_by_path(conn: &Connection, path: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, path, mode, size, digest FROM files WHERE path = ?1",
        )?;

        let files = stmt
            .query_map([path], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Find all files belonging to a package
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, path, mode, size, digest
             FROM files WHERE package_id = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    pub fn to_header_file(&self) -> HeaderFile {
        HeaderFile {
            path: self.path.clone(),
            mode: self.mode,
            size: self.size.max(0) as u64,
            digest: self.digest.clone(),
        }
    }

    /// Convert a database row to a FileEntry
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            path: row.get(2)?,
            mode: row.get(3)?,
            size: row.get(4)?,
            digest: row.get(5)?,
        })
    }
}

/// A scriptlet kept for an installed package
#[derive(Debug, Clone)]
pub struct ScriptletEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub kind: ScriptletKind,
    pub body: String,
}

impl ScriptletEntry {
    pub fn new(package_id: i64, kind: ScriptletKind, body: String) -> Self {
        Self {
            id: None,
            package_id,
            kind,
            body,
        }
    }

    /// Insert this scriptlet into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO scriptlets (package_id, kind, body) VALUES (?1, ?2, ?3)",
            params![&self.package_id, self.kind.as_str(), &self.body],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all scriptlets of a package
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, kind, body FROM scriptlets WHERE package_id = ?1",
        )?;

        let scripts = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(scripts)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(2)?;
        let kind = ScriptletKind::from_name(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid scriptlet kind: {}", kind_str),
                )),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            kind,
            body: row.get(3)?,
        })
    }
}

/// Store a complete header: package row, dependencies, files and scriptlets
pub fn insert_header(conn: &Connection, header: &Header, install_tid: u32) -> Result<i64> {
    let mut package = InstalledPackage::from_header(header, install_tid);
    let package_id = package.insert(conn)?;

    let groups = [
        (DependencyKind::Provides, &header.provides),
        (DependencyKind::Requires, &header.requires),
        (DependencyKind::Conflicts, &header.conflicts),
    ];
    for (kind, deps) in groups {
        for dep in deps {
            DependencyEntry::new(package_id, kind, dep).insert(conn)?;
        }
    }

    for file in &header.files {
        FileEntry::new(package_id, file).insert(conn)?;
    }

    for (kind, body) in header.scripts.iter() {
        ScriptletEntry::new(package_id, kind, body.to_string()).insert(conn)?;
    }

    Ok(package_id)
}

/// Load the header of an installed package
pub fn load_header(conn: &Connection, id: i64) -> Result<Option<Header>> {
    match InstalledPackage::find_by_id(conn, id)? {
        Some(package) => Ok(Some(header_from_package(conn, package)?)),
        None => Ok(None),
    }
}

/// Load the headers of every installed package
pub fn load_all_headers(conn: &Connection) -> Result<Vec<Header>> {
    InstalledPackage::list_all(conn)?
        .into_iter()
        .map(|package| header_from_package(conn, package))
        .collect()
}

fn header_from_package(conn: &Connection, package: InstalledPackage) -> Result<Header> {
    let row_id = package.id.unwrap_or_default();

    let mut provides = Vec::new();
    let mut requires = Vec::new();
    let mut conflicts = Vec::new();
    for entry in DependencyEntry::find_by_package(conn, row_id)? {
        let dep = entry.to_dependency();
        match entry.kind {
            DependencyKind::Provides => provides.push(dep),
            DependencyKind::Requires => requires.push(dep),
            DependencyKind::Conflicts => conflicts.push(dep),
        }
    }

    let files = FileEntry::find_by_package(conn, row_id)?
        .iter()
        .map(FileEntry::to_header_file)
        .collect();

    let mut header = Header {
        name: package.name,
        epoch: package.epoch,
        version: package.version,
        release: package.release,
        arch: package.arch,
        provides,
        requires,
        conflicts,
        files,
        scripts: Default::default(),
        pkgid: package.pkgid,
        origin: HeaderOrigin::Installed(to_db_id(row_id)?),
    };
    for script in ScriptletEntry::find_by_package(conn, row_id)? {
        header.scripts.set(script.kind, script.body);
    }
    header.ensure_self_provide();

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::header::Scriptlets;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    fn sample_header() -> Header {
        let mut scripts = Scriptlets::default();
        scripts.set(ScriptletKind::PostUninstall, "/sbin/ldconfig".to_string());

        Header {
            name: "nginx".to_string(),
            epoch: Some(1),
            version: "1.24.0".to_string(),
            release: "2".to_string(),
            arch: "x86_64".to_string(),
            provides: vec![Dependency::any("webserver")],
            requires: vec![Dependency::new(
                "openssl-libs",
                DepFlags::GREATER | DepFlags::EQUAL,
                "3.0",
            )],
            conflicts: vec![],
            files: vec![
                HeaderFile {
                    path: "/usr/sbin/nginx".to_string(),
                    mode: 0o100755,
                    size: 1024,
                    digest: "abc123".to_string(),
                },
                HeaderFile {
                    path: "/usr/share/nginx".to_string(),
                    mode: 0o040755,
                    size: 0,
                    digest: String::new(),
                },
            ],
            scripts,
            pkgid: Some("deadbeef".to_string()),
            origin: HeaderOrigin::File(PathBuf::from("/tmp/nginx.rpm")),
        }
    }

    #[test]
    fn test_package_crud() {
        let (_temp, conn) = create_test_db();

        let header = sample_header();
        let mut package = InstalledPackage::from_header(&header, 1700000000);
        let id = package.insert(&conn).unwrap();
        assert!(id > 0);
        assert_eq!(package.id, Some(id));

        let found = InstalledPackage::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found.name, "nginx");
        assert_eq!(found.epoch, Some(1));
        assert_eq!(found.install_tid, 1700000000);
        assert!(found.installed_at.is_some());
        assert_eq!(found.nevra().to_string(), "nginx-1:1.24.0-2.x86_64");

        let by_name = InstalledPackage::find_by_name(&conn, "nginx").unwrap();
        assert_eq!(by_name.len(), 1);

        InstalledPackage::delete(&conn, id).unwrap();
        assert!(InstalledPackage::find_by_id(&conn, id).unwrap().is_none());
    }

    #[test]
    fn test_header_round_trip_through_database() {
        let (_temp, conn) = create_test_db();

        let id = insert_header(&conn, &sample_header(), 1).unwrap();
        let loaded = load_header(&conn, id).unwrap().unwrap();

        assert_eq!(loaded.nevra(), "nginx-1:1.24.0-2.x86_64");
        assert_eq!(loaded.origin, HeaderOrigin::Installed(id as u32));
        assert_eq!(loaded.requires[0].to_string(), "openssl-libs >= 3.0");
        assert!(loaded.provides.iter().any(|p| p.name == "webserver"));
        // Self provide is added on load
        assert!(loaded.provides.iter().any(|p| p.name == "nginx"));
        assert_eq!(loaded.files.len(), 2);
        assert_eq!(
            loaded.scripts.get(ScriptletKind::PostUninstall),
            Some("/sbin/ldconfig")
        );
    }

    #[test]
    fn test_cascade_delete() {
        let (_temp, conn) = create_test_db();

        let id = insert_header(&conn, &sample_header(), 1).unwrap();
        InstalledPackage::delete(&conn, id).unwrap();

        assert!(FileEntry::find_by_path(&conn, "/usr/sbin/nginx").unwrap().is_empty());
        assert!(DependencyEntry::find_by_package(&conn, id).unwrap().is_empty());
        assert!(ScriptletEntry::find_by_package(&conn, id).unwrap().is_empty());
    }

    #[test]
    fn test_shared_paths_have_multiple_owners() {
        let (_temp, conn) = create_test_db();

        let first = insert_header(&conn, &sample_header(), 1).unwrap();
        let mut other = sample_header();
        other.name = "nginx-mod".to_string();
        let second = insert_header(&conn, &other, 1).unwrap();

        let owners = FileEntry::find_by_path(&conn, "/usr/share/nginx").unwrap();
        let ids: Vec<i64> = owners.iter().map(|f| f.package_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
    }

    #[test]
    fn test_load_missing_header() {
        let (_temp, conn) = create_test_db();
        assert!(load_header(&conn, 999).unwrap().is_none());
        assert!(load_all_headers(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_to_db_id_range() {
        assert_eq!(to_db_id(7).unwrap(), 7);
        assert!(to_db_id(-1).is_err());
        assert!(to_db_id(i64::from(u32::MAX) + 1).is_err());
    }
}
