// src/transaction.rs

//! Transaction engine
//!
//! A [`Transaction`] accumulates install, upgrade, reinstall and erase
//! operations on a native [`TransactionSet`], verifies them and runs them.
//! Items are borrowed for the lifetime of the transaction: the item
//! reference handed back to [`TransactionCallbacks`] is the one the caller
//! supplied.
//!
//! ```no_run
//! use pkgtx::config::Config;
//! use pkgtx::packages::PackageRef;
//! use pkgtx::transaction::{Transaction, TransactionItem};
//!
//! # fn main() -> pkgtx::Result<()> {
//! let config = Config::default();
//! let item = TransactionItem::install(PackageRef::from_file("foo-1.0-1.noarch.rpm")?);
//!
//! let mut tx = Transaction::new(&config)?;
//! tx.install(&item)?;
//! if tx.check() {
//!     let rc = tx.run()?;
//!     println!("run returned {}", rc);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::error::{Error, Result};
use crate::header::ScriptletKind;
use crate::packages::PackageRef;
use crate::problem::ProblemSet;
use crate::ts::{
    CallbackKind, ElementKey, HeaderHandle, Notification, ProblemFilter, RpmTransactionSet,
    RunOptions, TransactionFlags, TransactionSet, VerifyFlags,
};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What to do with a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    Install,
    Upgrade,
    Reinstall,
    Erase,
}

impl fmt::Display for ItemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemAction::Install => "install",
            ItemAction::Upgrade => "upgrade",
            ItemAction::Reinstall => "reinstall",
            ItemAction::Erase => "erase",
        };
        write!(f, "{}", s)
    }
}

/// A package paired with the operation to apply to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionItem {
    pkg: PackageRef,
    action: ItemAction,
}

impl TransactionItem {
    pub fn new(pkg: PackageRef, action: ItemAction) -> Self {
        Self { pkg, action }
    }

    pub fn install(pkg: PackageRef) -> Self {
        Self::new(pkg, ItemAction::Install)
    }

    pub fn upgrade(pkg: PackageRef) -> Self {
        Self::new(pkg, ItemAction::Upgrade)
    }

    pub fn reinstall(pkg: PackageRef) -> Self {
        Self::new(pkg, ItemAction::Reinstall)
    }

    pub fn erase(pkg: PackageRef) -> Self {
        Self::new(pkg, ItemAction::Erase)
    }

    pub fn pkg(&self) -> &PackageRef {
        &self.pkg
    }

    pub fn action(&self) -> ItemAction {
        self.action
    }
}

impl fmt::Display for TransactionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.pkg)
    }
}

/// Progress sink for `run()`
///
/// Every hook defaults to doing nothing. Hooks are called synchronously
/// from the thread running the transaction.
pub trait TransactionCallbacks {
    fn transaction_start(&mut self, _total: u64) {}

    fn install_start(&mut self, _item: &TransactionItem, _name: &str, _total: u64) {}

    fn install_progress(&mut self, _item: &TransactionItem, _name: &str, _amount: u64, _total: u64) {}

    fn install_stop(&mut self, _item: &TransactionItem, _name: &str) {}

    fn uninstall_start(&mut self, _item: &TransactionItem, _name: &str, _total: u64) {}

    fn uninstall_progress(&mut self, _item: &TransactionItem, _name: &str, _amount: u64, _total: u64) {}

    fn uninstall_stop(&mut self, _item: &TransactionItem, _name: &str) {}

    /// A scriptlet exited non-zero. `item` is `None` for packages replaced by
    /// an upgrade.
    fn script_error(
        &mut self,
        _item: Option<&TransactionItem>,
        _name: &str,
        _scriptlet: ScriptletKind,
        _rc: i32,
    ) {
    }

    fn transaction_stop(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accumulating,
    Completed,
}

/// Forward one notification to the sink
fn dispatch(cb: &mut dyn TransactionCallbacks, n: &Notification<'_>, item: Option<&TransactionItem>) {
    match (n.kind, item) {
        (CallbackKind::TransStart, _) => cb.transaction_start(n.total),
        (CallbackKind::TransStop, _) => cb.transaction_stop(),
        (CallbackKind::InstStart, Some(item)) => cb.install_start(item, n.name, n.total),
        (CallbackKind::InstProgress, Some(item)) => cb.install_progress(item, n.name, n.amount, n.total),
        (CallbackKind::InstStop, Some(item)) => cb.install_stop(item, n.name),
        (CallbackKind::UninstStart, Some(item)) => cb.uninstall_start(item, n.name, n.total),
        (CallbackKind::UninstProgress, Some(item)) => {
            cb.uninstall_progress(item, n.name, n.amount, n.total)
        }
        (CallbackKind::UninstStop, Some(item)) => cb.uninstall_stop(item, n.name),
        (CallbackKind::ScriptError, item) => {
            if let Some(kind) = n.script {
                cb.script_error(item, n.name, kind, n.status);
            }
        }
        (CallbackKind::UnpackError, _) => warn!("Failed to unpack {}", n.name),
        (kind, _) => debug!("Notification {:?} for {}", kind, n.name),
    }
}

/// Transaction engine over a native transaction set
pub struct Transaction<'a, S: TransactionSet = RpmTransactionSet> {
    ts: S,
    registry: HashMap<HeaderHandle, &'a TransactionItem>,
    keys: Vec<&'a TransactionItem>,
    callbacks: Option<Box<dyn TransactionCallbacks + 'a>>,
    script_out: Option<File>,
    ignore: ProblemFilter,
    state: State,
}

impl<'a> Transaction<'a, RpmTransactionSet> {
    /// Create an engine over the package database configured in `config`
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_set(config, RpmTransactionSet::new(config.dbpath.clone()))
    }
}

impl<'a, S: TransactionSet> Transaction<'a, S> {
    /// Create an engine over an existing native set
    ///
    /// Applies the install root, verify flags and transaction flags from
    /// `config`, in that order.
    pub fn with_set(config: &Config, mut ts: S) -> Result<Self> {
        ts.set_root_dir(config.installroot())?;
        ts.set_vs_flags(config.verify_flags()?);
        ts.set_flags(config.transaction_flags()?);

        debug!(
            "Transaction for root {} (flags {:?}, vsflags {:?})",
            ts.root_dir().display(),
            ts.flags(),
            ts.vs_flags()
        );

        Ok(Self {
            ts,
            registry: HashMap::new(),
            keys: Vec::new(),
            callbacks: None,
            script_out: None,
            ignore: config.problem_filter(),
            state: State::Accumulating,
        })
    }

    fn ensure_accumulating(&self) -> Result<()> {
        match self.state {
            State::Accumulating => Ok(()),
            State::Completed => Err(Error::AlreadyRun),
        }
    }

    fn ensure_unregistered(&self, handle: HeaderHandle, item: &TransactionItem) -> Result<()> {
        if self.registry.contains_key(&handle) {
            return Err(Error::DuplicateItemError(item.pkg().to_string()));
        }
        Ok(())
    }

    /// Register the progress sink, replacing any earlier one
    pub fn register_cb(&mut self, callbacks: Box<dyn TransactionCallbacks + 'a>) {
        self.callbacks = Some(callbacks);
    }

    fn add_local(&mut self, item: &'a TransactionItem, action: ItemAction) -> Result<()> {
        self.ensure_accumulating()?;
        let path = item
            .pkg()
            .local_path()
            .ok_or_else(|| Error::InvalidItem(format!("{} has no local package file", item.pkg())))?;

        let handle = self.ts.read_package_file(path)?;
        self.ensure_unregistered(handle, item)?;

        let key = ElementKey(self.keys.len());
        match action {
            ItemAction::Reinstall => self.ts.add_reinstall(handle, key)?,
            ItemAction::Upgrade => self.ts.add_install(handle, key, true)?,
            _ => self.ts.add_install(handle, key, false)?,
        }

        self.keys.push(item);
        self.registry.insert(handle, item);
        info!("Added {} to transaction", item);
        Ok(())
    }

    /// Add a package file for installation
    pub fn install(&mut self, item: &'a TransactionItem) -> Result<()> {
        self.add_local(item, ItemAction::Install)
    }

    /// Add a package file that replaces installed packages of the same name
    pub fn upgrade(&mut self, item: &'a TransactionItem) -> Result<()> {
        self.add_local(item, ItemAction::Upgrade)
    }

    /// Add a package file that replaces the installed package of the same NEVRA
    pub fn reinstall(&mut self, item: &'a TransactionItem) -> Result<()> {
        self.add_local(item, ItemAction::Reinstall)
    }

    /// Add an installed package for removal
    pub fn erase(&mut self, item: &'a TransactionItem) -> Result<()> {
        self.ensure_accumulating()?;
        let db_id = item
            .pkg()
            .db_id()
            .ok_or_else(|| Error::InvalidItem(format!("{} is not an installed package", item.pkg())))?;

        let handle = self.ts.read_installed(db_id)?;
        self.ensure_unregistered(handle, item)?;
        self.ts.add_erase(handle)?;

        self.registry.insert(handle, item);
        info!("Added {} to transaction", item);
        Ok(())
    }

    /// Add an item according to its action
    pub fn add(&mut self, item: &'a TransactionItem) -> Result<()> {
        match item.action() {
            ItemAction::Install => self.install(item),
            ItemAction::Upgrade => self.upgrade(item),
            ItemAction::Reinstall => self.reinstall(item),
            ItemAction::Erase => self.erase(item),
        }
    }

    /// Verify dependencies and conflicts; true when no problems were found
    pub fn check(&mut self) -> bool {
        let ok = self.ts.check();
        debug!("Transaction check: {}", if ok { "ok" } else { "problems found" });
        ok
    }

    /// Problems of the last `check()` or `run()`
    pub fn problems(&self) -> ProblemSet {
        self.ts.problems()
    }

    /// Execute the transaction
    ///
    /// Returns 0 on success, a negative value when an element failed and
    /// the number of problems when preparation found problems. Elements
    /// applied before a failure stay applied. A transaction runs once.
    pub fn run(&mut self) -> Result<i32> {
        self.ensure_accumulating()?;
        self.state = State::Completed;

        let options = RunOptions {
            ignore: self.ignore,
            script_out: self.script_out.as_ref(),
        };
        let registry = &self.registry;
        let keys = &self.keys;
        let callbacks = &mut self.callbacks;

        let mut notify = |n: &Notification<'_>| -> Option<File> {
            let item = n
                .key
                .and_then(|key| keys.get(key.0).copied())
                .or_else(|| n.header.and_then(|h| registry.get(&h).copied()));

            match n.kind {
                CallbackKind::InstOpenFile => {
                    let path = item?.pkg().local_path()?;
                    match File::open(path) {
                        Ok(file) => Some(file),
                        Err(e) => {
                            error!("Can't open {}: {}", path.display(), e);
                            None
                        }
                    }
                }
                CallbackKind::InstCloseFile => None,
                _ => {
                    if let Some(cb) = callbacks.as_deref_mut() {
                        dispatch(cb, n, item);
                    }
                    None
                }
            }
        };

        info!("Running transaction with {} element(s)", self.ts.element_count());
        let rc = self.ts.run(options, &mut notify);
        match rc {
            0 => info!("Transaction {} completed", self.ts.transaction_id()),
            n if n > 0 => warn!("Transaction not run, {} problem(s) found", n),
            _ => error!("Transaction failed"),
        }
        Ok(rc)
    }

    /// Send scriptlet output to a duplicate of `fd`
    pub fn set_script_out_fd(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        self.ensure_accumulating()?;
        let owned = fd.try_clone_to_owned().map_err(|source| Error::ScriptOutError {
            target: format!("fd {}", fd.as_raw_fd()),
            source,
        })?;
        self.script_out = Some(File::from(owned));
        Ok(())
    }

    /// Send scriptlet output to a file, created or truncated
    pub fn set_script_out_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_accumulating()?;
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| Error::ScriptOutError {
                target: path.display().to_string(),
                source,
            })?;
        self.script_out = Some(file);
        Ok(())
    }

    /// Number of elements in the set
    pub fn len(&self) -> usize {
        self.ts.element_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root_dir(&self) -> PathBuf {
        self.ts.root_dir().to_path_buf()
    }

    pub fn flags(&self) -> TransactionFlags {
        self.ts.flags()
    }

    /// Returns the previous flags
    pub fn set_flags(&mut self, flags: TransactionFlags) -> TransactionFlags {
        self.ts.set_flags(flags)
    }

    pub fn vs_flags(&self) -> VerifyFlags {
        self.ts.vs_flags()
    }

    /// Returns the previous flags
    pub fn set_vs_flags(&mut self, flags: VerifyFlags) -> VerifyFlags {
        self.ts.set_vs_flags(flags)
    }

    /// Problem kinds ignored by `run()`; returns the previous filter
    pub fn set_problem_filter(&mut self, filter: ProblemFilter) -> ProblemFilter {
        std::mem::replace(&mut self.ignore, filter)
    }

    pub fn transaction_id(&self) -> u32 {
        self.ts.transaction_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::header;
    use crate::header::{Header, HeaderOrigin};
    use crate::packages::Nevra;
    use crate::problem::{ProblemKind, ProblemRecord};
    use crate::ts::{ElementKind, HeaderArena, NotifyFn};
    use std::cell::RefCell;
    use std::io::{Read, Write};
    use std::os::fd::AsFd;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Scripted native set: headers come from file names, problems and the
    /// run result are preset
    struct FakeSet {
        root: PathBuf,
        flags: TransactionFlags,
        vs_flags: VerifyFlags,
        arena: HeaderArena,
        installed: Vec<u32>,
        elements: Vec<(HeaderHandle, Option<ElementKey>, ElementKind)>,
        problems: Vec<ProblemRecord>,
        reject: bool,
        check_calls: usize,
        rc: i32,
    }

    impl FakeSet {
        fn new() -> Self {
            Self {
                root: PathBuf::from("/"),
                flags: TransactionFlags::empty(),
                vs_flags: VerifyFlags::empty(),
                arena: HeaderArena::new(),
                installed: vec![1, 2],
                elements: Vec::new(),
                problems: Vec::new(),
                reject: false,
                check_calls: 0,
                rc: 0,
            }
        }

        fn push(&mut self, handle: HeaderHandle, key: Option<ElementKey>, kind: ElementKind) -> Result<()> {
            if self.reject {
                return Err(Error::ElementError("rejected".to_string()));
            }
            self.elements.push((handle, key, kind));
            Ok(())
        }
    }

    impl TransactionSet for FakeSet {
        fn set_root_dir(&mut self, root: &Path) -> Result<()> {
            if !root.is_absolute() || !root.is_dir() {
                return Err(Error::ConfigurationError(root.display().to_string()));
            }
            self.root = root.to_path_buf();
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
            42
        }

        fn read_package_file(&mut self, path: &Path) -> Result<HeaderHandle> {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let mut h = header(&name, "1.0");
            h.origin = HeaderOrigin::File(path.to_path_buf());
            Ok(self.arena.intern(h))
        }

        fn read_installed(&mut self, db_id: u32) -> Result<HeaderHandle> {
            if !self.installed.contains(&db_id) {
                return Err(Error::PackageNotFoundError(db_id));
            }
            let mut h = header(&format!("installed{}", db_id), "1.0");
            h.origin = HeaderOrigin::Installed(db_id);
            Ok(self.arena.intern(h))
        }

        fn header(&self, handle: HeaderHandle) -> Option<&Header> {
            self.arena.get(handle)
        }

        fn add_install(&mut self, handle: HeaderHandle, key: ElementKey, upgrade: bool) -> Result<()> {
            let kind = if upgrade { ElementKind::Upgrade } else { ElementKind::Install };
            self.push(handle, Some(key), kind)
        }

        fn add_reinstall(&mut self, handle: HeaderHandle, key: ElementKey) -> Result<()> {
            self.push(handle, Some(key), ElementKind::Reinstall)
        }

        fn add_erase(&mut self, handle: HeaderHandle) -> Result<()> {
            self.push(handle, None, ElementKind::Erase)
        }

        fn element_count(&self) -> usize {
            self.elements.len()
        }

        fn check(&mut self) -> bool {
            self.check_calls += 1;
            self.problems.is_empty()
        }

        fn problems(&self) -> ProblemSet {
            ProblemSet::new(self.problems.clone())
        }

        fn run(&mut self, options: RunOptions<'_>, notify: &mut NotifyFn<'_>) -> i32 {
            if let Some(mut out) = options.script_out {
                let _ = writeln!(out, "scriptlet output");
            }

            let total = self.elements.len() as u64;
            notify(&Notification::new(CallbackKind::TransStart, 0, total));
            for (step, (handle, key, kind)) in self.elements.iter().enumerate() {
                let name = self.arena.get(*handle).map(|h| h.name.as_str()).unwrap_or("");
                let about = |kind, amount, total| {
                    Notification::new(kind, amount, total).about(*handle, name, *key)
                };
                if kind.is_install() {
                    notify(&about(CallbackKind::InstOpenFile, 0, 0));
                    notify(&about(CallbackKind::InstStart, 0, 100));
                    notify(&about(CallbackKind::InstProgress, 40, 100));
                    notify(&about(CallbackKind::InstProgress, 100, 100));
                    notify(&about(CallbackKind::InstStop, 100, 100));
                    notify(&about(CallbackKind::InstCloseFile, 100, 100));
                } else {
                    notify(&about(CallbackKind::UninstStart, 0, 3));
                    notify(&about(CallbackKind::UninstProgress, 3, 3));
                    notify(&about(CallbackKind::UninstStop, 3, 3));
                    notify(
                        &about(CallbackKind::ScriptError, 0, 0).scriptlet(ScriptletKind::PostUninstall, 1),
                    );
                }
                notify(&Notification::new(CallbackKind::TransProgress, step as u64 + 1, total));
            }
            notify(&Notification::new(CallbackKind::TransStop, total, total));
            self.rc
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Start(u64),
        InstallStart(usize, String, u64),
        InstallProgress(usize, u64),
        InstallStop(usize),
        UninstallStart(usize),
        UninstallProgress(usize, u64),
        UninstallStop(usize),
        ScriptError(Option<usize>, ScriptletKind, i32),
        Stop,
    }

    /// Records events with the item address, to check item identity
    struct Recorder {
        events: Rc<RefCell<Vec<Event>>>,
    }

    fn addr(item: &TransactionItem) -> usize {
        item as *const TransactionItem as usize
    }

    impl TransactionCallbacks for Recorder {
        fn transaction_start(&mut self, total: u64) {
            self.events.borrow_mut().push(Event::Start(total));
        }

        fn install_start(&mut self, item: &TransactionItem, name: &str, total: u64) {
            self.events
                .borrow_mut()
                .push(Event::InstallStart(addr(item), name.to_string(), total));
        }

        fn install_progress(&mut self, item: &TransactionItem, _name: &str, amount: u64, _total: u64) {
            self.events.borrow_mut().push(Event::InstallProgress(addr(item), amount));
        }

        fn install_stop(&mut self, item: &TransactionItem, _name: &str) {
            self.events.borrow_mut().push(Event::InstallStop(addr(item)));
        }

        fn uninstall_start(&mut self, item: &TransactionItem, _name: &str, _total: u64) {
            self.events.borrow_mut().push(Event::UninstallStart(addr(item)));
        }

        fn uninstall_progress(&mut self, item: &TransactionItem, _name: &str, amount: u64, _total: u64) {
            self.events.borrow_mut().push(Event::UninstallProgress(addr(item), amount));
        }

        fn uninstall_stop(&mut self, item: &TransactionItem, _name: &str) {
            self.events.borrow_mut().push(Event::UninstallStop(addr(item)));
        }

        fn script_error(&mut self, item: Option<&TransactionItem>, _name: &str, scriptlet: ScriptletKind, rc: i32) {
            self.events
                .borrow_mut()
                .push(Event::ScriptError(item.map(addr), scriptlet, rc));
        }

        fn transaction_stop(&mut self) {
            self.events.borrow_mut().push(Event::Stop);
        }
    }

    fn local(name: &str) -> TransactionItem {
        TransactionItem::install(PackageRef::local(
            Nevra::new(name, None, "1.0", "1", "noarch"),
            format!("/pkgs/{}.rpm", name),
        ))
    }

    fn installed(name: &str, id: u32) -> TransactionItem {
        TransactionItem::erase(PackageRef::installed(Nevra::new(name, None, "1.0", "1", "noarch"), id))
    }

    fn engine<'a>() -> Transaction<'a, FakeSet> {
        Transaction::with_set(&Config::default(), FakeSet::new()).unwrap()
    }

    #[test]
    fn test_construction_applies_config() {
        let root = TempDir::new().unwrap();
        let mut config = Config::default();
        config.installroot = root.path().to_path_buf();
        config.set("tsflags", "test").unwrap();
        config.set("vsflags", "nodigests").unwrap();

        let tx = Transaction::with_set(&config, FakeSet::new()).unwrap();
        assert_eq!(tx.root_dir(), root.path());
        assert_eq!(tx.flags(), TransactionFlags::TEST);
        assert_eq!(tx.vs_flags(), VerifyFlags::NODIGESTS);
        assert!(tx.is_empty());
    }

    #[test]
    fn test_construction_rejects_bad_root() {
        let mut config = Config::default();
        config.installroot = PathBuf::from("/nonexistent/pkgtx-root");
        assert!(matches!(
            Transaction::with_set(&config, FakeSet::new()),
            Err(Error::ConfigurationError(_))
        ));

        config.installroot = PathBuf::from("relative");
        assert!(matches!(
            Transaction::new(&config),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_duplicate_item_rejected_without_growing() {
        let foo = local("foo");
        let foo_again = local("foo");
        let bar = local("bar");

        let mut tx = engine();
        tx.install(&foo).unwrap();
        assert_eq!(tx.len(), 1);

        assert!(matches!(tx.install(&foo_again), Err(Error::DuplicateItemError(_))));
        assert!(matches!(tx.upgrade(&foo), Err(Error::DuplicateItemError(_))));
        assert_eq!(tx.len(), 1);

        tx.upgrade(&bar).unwrap();
        assert_eq!(tx.len(), 2);
    }

    #[test]
    fn test_location_kind_is_checked() {
        let by_path = local("foo");
        let by_id = installed("bar", 1);

        let mut tx = engine();
        assert!(matches!(tx.erase(&by_path), Err(Error::InvalidItem(_))));
        assert!(matches!(tx.install(&by_id), Err(Error::InvalidItem(_))));
        assert!(matches!(tx.reinstall(&by_id), Err(Error::InvalidItem(_))));
        assert!(tx.is_empty());
    }

    #[test]
    fn test_erase_unknown_id() {
        let missing = installed("ghost", 99);
        let present = installed("bar", 2);

        let mut tx = engine();
        assert!(matches!(tx.erase(&missing), Err(Error::PackageNotFoundError(99))));
        assert_eq!(tx.len(), 0);

        tx.add(&present).unwrap();
        assert!(matches!(tx.erase(&present), Err(Error::DuplicateItemError(_))));
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn test_native_rejection_is_element_error() {
        let foo = local("foo");
        let mut set = FakeSet::new();
        set.reject = true;

        let mut tx = Transaction::with_set(&Config::default(), set).unwrap();
        assert!(matches!(tx.reinstall(&foo), Err(Error::ElementError(_))));
        assert!(tx.is_empty());

        // Not registered, so a later add is not a duplicate
        tx.ts.reject = false;
        tx.reinstall(&foo).unwrap();
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn test_check_is_idempotent() {
        let foo = local("foo");
        let mut set = FakeSet::new();
        set.problems = vec![ProblemRecord::new(ProblemKind::Requires, "foo-1.0-1.noarch", "bar")];

        let mut tx = Transaction::with_set(&Config::default(), set).unwrap();
        tx.install(&foo).unwrap();

        assert!(!tx.check());
        let first = tx.problems();
        assert!(!tx.check());
        let second = tx.problems();
        assert_eq!(first, second);
        assert_eq!(tx.ts.check_calls, 2);
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn test_notifications_reach_sink_in_order() {
        let foo = local("foo");
        let bar = installed("bar", 1);
        let events = Rc::new(RefCell::new(Vec::new()));

        let mut tx = engine();
        tx.register_cb(Box::new(Recorder {
            events: Rc::clone(&events),
        }));
        tx.install(&foo).unwrap();
        tx.erase(&bar).unwrap();

        assert_eq!(tx.run().unwrap(), 0);

        let (f, b) = (addr(&foo), addr(&bar));
        assert_eq!(
            *events.borrow(),
            vec![
                Event::Start(2),
                Event::InstallStart(f, "foo".to_string(), 100),
                Event::InstallProgress(f, 40),
                Event::InstallProgress(f, 100),
                Event::InstallStop(f),
                Event::UninstallStart(b),
                Event::UninstallProgress(b, 3),
                Event::UninstallStop(b),
                Event::ScriptError(Some(b), ScriptletKind::PostUninstall, 1),
                Event::Stop,
            ]
        );
    }

    #[test]
    fn test_later_registration_replaces_sink() {
        let foo = local("foo");
        let first = Rc::new(RefCell::new(Vec::new()));
        let second = Rc::new(RefCell::new(Vec::new()));

        let mut tx = engine();
        tx.register_cb(Box::new(Recorder {
            events: Rc::clone(&first),
        }));
        tx.register_cb(Box::new(Recorder {
            events: Rc::clone(&second),
        }));
        tx.install(&foo).unwrap();
        tx.run().unwrap();

        assert!(first.borrow().is_empty());
        assert!(!second.borrow().is_empty());
    }

    #[test]
    fn test_second_run_fails() {
        let foo = local("foo");
        let bar = local("bar");

        let mut tx = engine();
        tx.install(&foo).unwrap();
        assert_eq!(tx.run().unwrap(), 0);

        assert!(matches!(tx.run(), Err(Error::AlreadyRun)));
        assert!(matches!(tx.install(&bar), Err(Error::AlreadyRun)));
        assert!(matches!(tx.set_script_out_file("/dev/null"), Err(Error::AlreadyRun)));
        assert_eq!(tx.len(), 1);
        assert_eq!(tx.transaction_id(), 42);
    }

    #[test]
    fn test_run_status_is_passed_through() {
        let foo = local("foo");
        let mut set = FakeSet::new();
        set.rc = 3;

        let mut tx = Transaction::with_set(&Config::default(), set).unwrap();
        tx.install(&foo).unwrap();
        assert_eq!(tx.run().unwrap(), 3);
    }

    #[test]
    fn test_replacing_script_out_closes_previous() {
        let dir = TempDir::new().unwrap();
        let (mut reader, writer) = std::io::pipe().unwrap();
        let foo = local("foo");

        let mut tx = engine();
        tx.set_script_out_fd(writer.as_fd()).unwrap();
        drop(writer);

        let log = dir.path().join("scriptlets.log");
        tx.set_script_out_file(&log).unwrap();

        // The engine's duplicate was the last write end
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());

        tx.install(&foo).unwrap();
        tx.run().unwrap();
        drop(tx);

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "scriptlet output\n");
    }

    #[test]
    fn test_script_out_fd_receives_output() {
        let (mut reader, writer) = std::io::pipe().unwrap();
        let foo = local("foo");

        let mut tx = engine();
        tx.set_script_out_fd(writer.as_fd()).unwrap();
        drop(writer);
        tx.install(&foo).unwrap();
        tx.run().unwrap();
        drop(tx);

        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "scriptlet output\n");
    }

    #[test]
    fn test_bad_script_out_path() {
        let mut tx = engine();
        let err = tx
            .set_script_out_file("/nonexistent/dir/out.log")
            .unwrap_err();
        assert!(matches!(err, Error::ScriptOutError { .. }));
    }

    #[test]
    fn test_problem_filter_and_flags() {
        let mut tx = engine();
        assert_eq!(tx.set_problem_filter(ProblemFilter::OLD_PACKAGE), ProblemFilter::empty());
        assert_eq!(tx.set_problem_filter(ProblemFilter::empty()), ProblemFilter::OLD_PACKAGE);
        assert_eq!(tx.set_flags(TransactionFlags::NOSCRIPTS), TransactionFlags::empty());
        assert_eq!(tx.set_vs_flags(VerifyFlags::NOFILEDIGEST), VerifyFlags::empty());
        assert_eq!(tx.flags(), TransactionFlags::NOSCRIPTS);
    }
}
