// src/ts/rpmts.rs

//! Production transaction set
//!
//! Reads headers from RPM files and from the SQLite package database below
//! the install root, verifies the elements and applies them to the root.

use super::check::{self, AddedPackage, Universe};
use super::deploy::{self, run_scriptlet};
use super::order::order;
use super::{
    CallbackKind, ElementKey, ElementKind, HeaderArena, HeaderHandle, Notification, NotifyFn,
    RunOptions, TransactionFlags, TransactionSet, VerifyFlags,
};
use crate::db::{self, models};
use crate::error::{Error, Result};
use crate::header::{Header, HeaderOrigin, ScriptletKind};
use crate::packages::rpm::{read_header, read_payload};
use crate::problem::{ProblemRecord, ProblemSet};
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct Element {
    kind: ElementKind,
    header: HeaderHandle,
    key: Option<ElementKey>,
    /// Database ids of installed packages this element replaces
    replaces: Vec<u32>,
}

/// Same arch, or either side is `noarch`
fn arch_replaceable(old: &str, new: &str) -> bool {
    old == new || old == "noarch" || new == "noarch"
}

pub struct RpmTransactionSet {
    root: PathBuf,
    dbpath: PathBuf,
    flags: TransactionFlags,
    vs_flags: VerifyFlags,
    tid: u32,
    arena: HeaderArena,
    elements: Vec<Element>,
    problems: Vec<ProblemRecord>,
    conn: Option<Connection>,
}

impl RpmTransactionSet {
    /// Create a set rooted at `/` that keeps its database under `dbpath`
    /// (relative to the root)
    pub fn new(dbpath: impl Into<PathBuf>) -> Self {
        Self {
            root: PathBuf::from("/"),
            dbpath: dbpath.into(),
            flags: TransactionFlags::empty(),
            vs_flags: VerifyFlags::empty(),
            tid: 0,
            arena: HeaderArena::new(),
            elements: Vec::new(),
            problems: Vec::new(),
            conn: None,
        }
    }

    /// Path of the package database for the current root
    pub fn db_path(&self) -> PathBuf {
        db::database_path(&self.root, &self.dbpath)
    }

    /// Open the database if needed
    ///
    /// Without `create`, a missing database is not an error and leaves the
    /// connection unset.
    fn ensure_connection(&mut self, create: bool) -> Result<bool> {
        if self.conn.is_none() {
            let path = self.db_path();
            if create {
                self.conn = Some(db::init(&path)?);
            } else if path.exists() {
                self.conn = Some(db::open(&path)?);
            }
        }
        Ok(self.conn.is_some())
    }

    /// Load every installed header into the arena
    fn installed_headers(&mut self) -> Result<Vec<HeaderHandle>> {
        if !self.ensure_connection(false)? {
            return Ok(Vec::new());
        }
        let Some(conn) = self.conn.as_ref() else {
            return Ok(Vec::new());
        };

        let headers = models::load_all_headers(conn)?;
        Ok(headers.into_iter().map(|h| self.arena.intern(h)).collect())
    }

    fn header_or_err(&self, handle: HeaderHandle) -> Result<&Header> {
        self.arena
            .get(handle)
            .ok_or_else(|| Error::ElementError(format!("unknown header {}", handle)))
    }

    fn universe(&self, installed: &[HeaderHandle]) -> Universe<'_> {
        let headers: Vec<&Header> = installed.iter().filter_map(|h| self.arena.get(*h)).collect();

        let mut removed = HashSet::new();
        let mut added = Vec::new();
        for element in &self.elements {
            removed.extend(element.replaces.iter().copied());
            let Some(header) = self.arena.get(element.header) else {
                continue;
            };
            if element.kind == ElementKind::Erase {
                removed.extend(header.db_id());
                continue;
            }
            let replaces = element
                .replaces
                .iter()
                .filter_map(|id| self.arena.lookup(&HeaderOrigin::Installed(*id)))
                .filter_map(|h| self.arena.get(h))
                .collect();
            added.push(AddedPackage {
                header,
                key: element.key,
                kind: element.kind,
                replaces,
            });
        }

        Universe::new(headers, removed, added)
    }
}

impl TransactionSet for RpmTransactionSet {
    fn set_root_dir(&mut self, root: &Path) -> Result<()> {
        if !root.is_absolute() {
            return Err(Error::ConfigurationError(format!(
                "install root must be an absolute path: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(Error::ConfigurationError(format!(
                "install root is not a directory: {}",
                root.display()
            )));
        }
        if self.root != root {
            self.root = root.to_path_buf();
            self.conn = None;
        }
        Ok(())
    }

    fn root_dir(&self) -> &Path {
        &self.root
    }

    fn flags(&self) -> TransactionFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TransactionFlags) -> TransactionFlags {
        std::mem::replace(&mut self.flags, flags)
    }

    fn vs_flags(&self) -> VerifyFlags {
        self.vs_flags
    }

    fn set_vs_flags(&mut self, flags: VerifyFlags) -> VerifyFlags {
        std::mem::replace(&mut self.vs_flags, flags)
    }

    fn transaction_id(&self) -> u32 {
        self.tid
    }

    fn read_package_file(&mut self, path: &Path) -> Result<HeaderHandle> {
        let header = read_header(path, self.vs_flags)?;
        Ok(self.arena.intern(header))
    }

    fn read_installed(&mut self, db_id: u32) -> Result<HeaderHandle> {
        if let Some(handle) = self.arena.lookup(&HeaderOrigin::Installed(db_id)) {
            return Ok(handle);
        }
        if !self.ensure_connection(false)? {
            return Err(Error::PackageNotFoundError(db_id));
        }
        let Some(conn) = self.conn.as_ref() else {
            return Err(Error::PackageNotFoundError(db_id));
        };

        let header = models::load_header(conn, i64::from(db_id))?
            .ok_or(Error::PackageNotFoundError(db_id))?;
        Ok(self.arena.intern(header))
    }

    fn header(&self, handle: HeaderHandle) -> Option<&Header> {
        self.arena.get(handle)
    }

    fn add_install(&mut self, handle: HeaderHandle, key: ElementKey, upgrade: bool) -> Result<()> {
        let header = self.header_or_err(handle)?;
        if header.db_id().is_some() {
            return Err(Error::ElementError(format!(
                "{} is already installed and can't be added for install",
                header.nevra()
            )));
        }

        let mut replaces = Vec::new();
        if upgrade {
            let (name, arch) = (header.name.clone(), header.arch.clone());
            for handle in self.installed_headers()? {
                if let Some(old) = self.arena.get(handle)
                    && old.name == name
                    && arch_replaceable(&old.arch, &arch)
                {
                    replaces.extend(old.db_id());
                }
            }
        }

        debug!("Adding {} element {} (replaces {:?})", if upgrade { "upgrade" } else { "install" }, handle, replaces);
        self.elements.push(Element {
            kind: if upgrade { ElementKind::Upgrade } else { ElementKind::Install },
            header: handle,
            key: Some(key),
            replaces,
        });
        Ok(())
    }

    fn add_reinstall(&mut self, handle: HeaderHandle, key: ElementKey) -> Result<()> {
        let header = self.header_or_err(handle)?.clone();
        if header.db_id().is_some() {
            return Err(Error::ElementError(format!(
                "{} must be reinstalled from a package file",
                header.nevra()
            )));
        }

        let installed = self
            .installed_headers()?
            .into_iter()
            .filter_map(|h| self.arena.get(h))
            .find(|old| old.same_nevra(&header))
            .and_then(|old| old.db_id());

        let Some(id) = installed else {
            return Err(Error::ElementError(format!(
                "{} is not installed, can't reinstall",
                header.nevra()
            )));
        };

        self.elements.push(Element {
            kind: ElementKind::Reinstall,
            header: handle,
            key: Some(key),
            replaces: vec![id],
        });
        Ok(())
    }

    fn add_erase(&mut self, handle: HeaderHandle) -> Result<()> {
        let header = self.header_or_err(handle)?;
        if header.db_id().is_none() {
            return Err(Error::ElementError(format!(
                "{} is not an installed package",
                header.nevra()
            )));
        }

        self.elements.push(Element {
            kind: ElementKind::Erase,
            header: handle,
            key: None,
            replaces: Vec::new(),
        });
        Ok(())
    }

    fn element_count(&self) -> usize {
        self.elements.len()
    }

    fn check(&mut self) -> bool {
        let installed = self.installed_headers().unwrap_or_else(|e| {
            warn!("Can't read installed packages, checking against an empty set: {}", e);
            Vec::new()
        });

        let problems = self.universe(&installed).dependency_problems();
        debug!("Dependency check found {} problem(s)", problems.len());
        self.problems = problems;
        self.problems.is_empty()
    }

    fn problems(&self) -> ProblemSet {
        ProblemSet::new(self.problems.clone())
    }

    fn run(&mut self, options: RunOptions<'_>, notify: &mut NotifyFn<'_>) -> i32 {
        self.tid = chrono::Utc::now().timestamp() as u32;

        let installed = match self.installed_headers() {
            Ok(installed) => installed,
            Err(e) => {
                error!("Can't read the package database: {}", e);
                return -1;
            }
        };

        let problems = self
            .universe(&installed)
            .prepare_problems(check::host_arch(), options.ignore);
        self.problems = problems;
        if !self.problems.is_empty() {
            info!("Transaction preparation found {} problem(s)", self.problems.len());
            return self.problems.len() as i32;
        }

        if self.flags.contains(TransactionFlags::TEST) {
            info!("Test transaction, nothing applied");
            return 0;
        }

        if let Err(e) = self.ensure_connection(true) {
            error!("Can't open the package database: {}", e);
            return -1;
        }
        let Some(conn) = self.conn.as_mut() else {
            return -1;
        };

        let mut pairs = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match self.arena.get(element.header) {
                Some(header) => pairs.push((header, element.kind)),
                None => return -1,
            }
        }
        let sequence = order(&pairs);

        let total = self.elements.len() as u64;
        let mut executor = Executor {
            root: &self.root,
            flags: self.flags,
            verify: !self.vs_flags.contains(VerifyFlags::NOFILEDIGEST),
            tid: self.tid,
            script_out: options.script_out,
            arena: &self.arena,
            notify,
        };

        executor.emit(Notification::new(CallbackKind::TransStart, 0, total));
        let mut rc = 0;
        for (step, index) in sequence.into_iter().enumerate() {
            let element = &self.elements[index];
            let result = if element.kind.is_install() {
                executor.install(conn, element)
            } else {
                executor.erase(conn, element)
            };
            if let Err(e) = result {
                error!("Transaction aborted: {}", e);
                rc = -1;
                break;
            }
            executor.emit(Notification::new(CallbackKind::TransProgress, step as u64 + 1, total));
        }
        executor.emit(Notification::new(CallbackKind::TransStop, total, total));

        if rc == 0 {
            info!("Transaction {} applied {} element(s)", self.tid, total);
        }
        rc
    }
}

/// Per-run state for applying elements
struct Executor<'r, 'n, 'f> {
    root: &'r Path,
    flags: TransactionFlags,
    verify: bool,
    tid: u32,
    script_out: Option<&'r File>,
    arena: &'r HeaderArena,
    notify: &'n mut NotifyFn<'f>,
}

impl<'r> Executor<'r, '_, '_> {
    fn emit(&mut self, notification: Notification<'_>) -> Option<File> {
        (self.notify)(&notification)
    }

    fn header(&self, handle: HeaderHandle) -> Result<&'r Header> {
        self.arena
            .get(handle)
            .ok_or_else(|| Error::ElementError(format!("unknown header {}", handle)))
    }

    /// Run one scriptlet if the package has it
    ///
    /// Failures of `%pre` and `%preun` are returned as errors, the others are
    /// only reported.
    fn scriptlet(
        &mut self,
        handle: HeaderHandle,
        key: Option<ElementKey>,
        kind: ScriptletKind,
        count: u32,
    ) -> Result<()> {
        if self.flags.contains(TransactionFlags::NOSCRIPTS) {
            return Ok(());
        }
        let header = self.header(handle)?;
        let Some(body) = header.scripts.get(kind) else {
            return Ok(());
        };
        let name = header.name.as_str();

        self.emit(Notification::new(CallbackKind::ScriptStart, 0, 0).about(handle, name, key).scriptlet(kind, 0));
        let rc = run_scriptlet(self.root, kind, body, name, count, self.script_out).unwrap_or_else(|e| {
            warn!("Can't run {} scriptlet of {}: {}", kind, name, e);
            -1
        });
        self.emit(Notification::new(CallbackKind::ScriptStop, 0, 0).about(handle, name, key).scriptlet(kind, rc));

        if rc != 0 {
            self.emit(Notification::new(CallbackKind::ScriptError, 0, 0).about(handle, name, key).scriptlet(kind, rc));
            if kind.is_fatal() {
                return Err(Error::ElementError(format!(
                    "{} scriptlet of {} failed, exit status {}",
                    kind, name, rc
                )));
            }
            warn!("{} scriptlet of {} failed, exit status {}", kind, name, rc);
        }
        Ok(())
    }

    fn install(&mut self, conn: &mut Connection, element: &Element) -> Result<()> {
        let arena = self.arena;
        let handle = element.header;
        let header = self.header(handle)?;
        let name = header.name.as_str();
        let key = element.key;
        let HeaderOrigin::File(path) = &header.origin else {
            return Err(Error::ElementError(format!("{} has no package file", header.nevra())));
        };

        let Some(file) = self.emit(Notification::new(CallbackKind::InstOpenFile, 0, 0).about(handle, name, key)) else {
            return Err(Error::ElementError(format!("no package file supplied for {}", header.nevra())));
        };

        let total = header.payload_size();
        self.emit(Notification::new(CallbackKind::InstStart, 0, total).about(handle, name, key));

        let existing = models::InstalledPackage::find_by_name(conn, name)?.len() as u32;
        let count = if element.kind == ElementKind::Reinstall {
            existing.max(1)
        } else {
            existing + 1
        };

        self.scriptlet(handle, key, ScriptletKind::PreInstall, count)?;

        if self.flags.contains(TransactionFlags::JUSTDB) {
            drop(file);
        } else {
            let unpacked = read_payload(file, path).and_then(|payload| {
                let notify = &mut *self.notify;
                deploy::unpack(self.root, &payload, &header.files, self.verify, &mut |written: u64| {
                    let amount = written.min(total);
                    notify(&Notification::new(CallbackKind::InstProgress, amount, total).about(handle, name, key));
                })
            });
            if let Err(e) = unpacked {
                self.emit(Notification::new(CallbackKind::UnpackError, 0, total).about(handle, name, key));
                self.emit(Notification::new(CallbackKind::InstCloseFile, 0, total).about(handle, name, key));
                return Err(e);
            }
        }
        self.emit(Notification::new(CallbackKind::InstProgress, total, total).about(handle, name, key));

        // Swap the database rows in one step so a reinstall of the same
        // NEVRA never sees two rows
        let tid = self.tid;
        let package_id = db::transaction(conn, |tx| {
            for id in &element.replaces {
                models::InstalledPackage::delete(tx, i64::from(*id))?;
            }
            models::insert_header(tx, header, tid)
        })?;
        debug!("Recorded {} as package {}", header.nevra(), package_id);

        self.scriptlet(handle, key, ScriptletKind::PostInstall, count)?;

        for id in &element.replaces {
            let Some(old) = arena.lookup(&HeaderOrigin::Installed(*id)) else {
                warn!("Replaced package {} is not loaded, skipping", id);
                continue;
            };
            self.remove_installed(conn, old, None, count.saturating_sub(1).max(1), false)?;
        }

        self.emit(Notification::new(CallbackKind::InstStop, total, total).about(handle, name, key));
        self.emit(Notification::new(CallbackKind::InstCloseFile, total, total).about(handle, name, key));
        info!("Installed {}", header.nevra());
        Ok(())
    }

    fn erase(&mut self, conn: &mut Connection, element: &Element) -> Result<()> {
        let handle = element.header;
        let header = self.header(handle)?;
        let name = header.name.as_str();
        let total = header.files.len() as u64;

        self.emit(Notification::new(CallbackKind::UninstStart, 0, total).about(handle, name, None));
        let remaining = (models::InstalledPackage::find_by_name(conn, name)?.len() as u32).saturating_sub(1);
        self.remove_installed(conn, handle, None, remaining, true)?;
        self.emit(Notification::new(CallbackKind::UninstProgress, total, total).about(handle, name, None));
        self.emit(Notification::new(CallbackKind::UninstStop, total, total).about(handle, name, None));
        info!("Erased {}", header.nevra());
        Ok(())
    }

    /// `%preun`, database row, files, `%postun` for one installed package
    ///
    /// Replaced packages have their row dropped together with the insert of
    /// the new package, so `delete_row` is false for them.
    fn remove_installed(
        &mut self,
        conn: &mut Connection,
        handle: HeaderHandle,
        key: Option<ElementKey>,
        count: u32,
        delete_row: bool,
    ) -> Result<()> {
        let header = self.header(handle)?;
        let Some(id) = header.db_id() else {
            return Err(Error::ElementError(format!("{} is not installed", header.nevra())));
        };

        self.scriptlet(handle, key, ScriptletKind::PreUninstall, count)?;

        if delete_row {
            db::transaction(conn, |tx| models::InstalledPackage::delete(tx, i64::from(id)))?;
        }

        if !self.flags.contains(TransactionFlags::JUSTDB) {
            let reader: &Connection = conn;
            let owned_elsewhere = |path: &str| {
                models::FileEntry::find_by_path(reader, path)
                    .map(|owners| !owners.is_empty())
                    .unwrap_or(true)
            };
            let removed = deploy::remove_files(self.root, &header.files, &owned_elsewhere);
            debug!("Removed {} path(s) of {}", removed, header.nevra());
        }

        self.scriptlet(handle, key, ScriptletKind::PostUninstall, count)?;
        Ok(())
    }
}
