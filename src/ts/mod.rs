// src/ts/mod.rs

//! Native transaction-set layer
//!
//! The engine in [`crate::transaction`] never touches headers, the package
//! database or the filesystem directly. It drives an implementation of
//! [`TransactionSet`], which owns the headers (behind opaque
//! [`HeaderHandle`]s), the pending elements and the problem records.
//! [`RpmTransactionSet`] is the production implementation.

mod arena;
mod check;
mod deploy;
mod order;
mod rpmts;

pub use arena::{HeaderArena, HeaderHandle};
pub use deploy::run_scriptlet;
pub use rpmts::RpmTransactionSet;

use crate::error::Result;
use crate::header::{Header, ScriptletKind};
use crate::problem::ProblemSet;
use bitflags::bitflags;
use std::fs::File;
use std::path::Path;

bitflags! {
    /// Bits that control `run()`
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct TransactionFlags: u32 {
        /// Check everything, change nothing
        const TEST = 1 << 0;
        /// Don't run scriptlets
        const NOSCRIPTS = 1 << 1;
        /// Only update the database, leave the filesystem alone
        const JUSTDB = 1 << 2;
    }
}

bitflags! {
    /// Signature and digest verification bits
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct VerifyFlags: u32 {
        /// Don't compute the package digest (package id)
        const NODIGESTS = 1 << 0;
        /// Don't verify payload file digests while unpacking
        const NOFILEDIGEST = 1 << 1;
    }
}

bitflags! {
    /// Problem kinds to ignore when `run()` prepares the transaction
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ProblemFilter: u32 {
        const IGNORE_ARCH = 1 << 0;
        const REPLACE_PKG = 1 << 1;
        const OLD_PACKAGE = 1 << 2;
        const REPLACE_NEW_FILES = 1 << 3;
        const REPLACE_OLD_FILES = 1 << 4;
    }
}

/// Map flag names to bits using an explicit table
///
/// Unknown names are returned as the error value.
fn flags_from_names<F: bitflags::Flags + Copy>(
    names: &[String],
    table: &[(&str, F)],
) -> std::result::Result<F, String> {
    let mut flags = F::empty();
    for name in names {
        let bit = table
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, bit)| *bit)
            .ok_or_else(|| name.clone())?;
        flags.insert(bit);
    }
    Ok(flags)
}

impl TransactionFlags {
    /// Names accepted by the `tsflags` configuration option
    pub const NAMES: &'static [(&'static str, TransactionFlags)] = &[
        ("test", TransactionFlags::TEST),
        ("noscripts", TransactionFlags::NOSCRIPTS),
        ("justdb", TransactionFlags::JUSTDB),
    ];

    pub fn from_names(
        names: &[String],
        table: &[(&str, TransactionFlags)],
    ) -> std::result::Result<Self, String> {
        flags_from_names(names, table)
    }
}

impl VerifyFlags {
    /// Names accepted by the `vsflags` configuration option
    pub const NAMES: &'static [(&'static str, VerifyFlags)] = &[
        ("nodigests", VerifyFlags::NODIGESTS),
        ("nofiledigest", VerifyFlags::NOFILEDIGEST),
    ];

    pub fn from_names(
        names: &[String],
        table: &[(&str, VerifyFlags)],
    ) -> std::result::Result<Self, String> {
        flags_from_names(names, table)
    }
}

/// Correlation token attached to an element, handed back in notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementKey(pub usize);

/// Operation of one element in the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Install,
    Upgrade,
    Reinstall,
    Erase,
}

impl ElementKind {
    pub fn is_install(&self) -> bool {
        !matches!(self, ElementKind::Erase)
    }
}

/// What a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    TransStart,
    TransProgress,
    TransStop,
    /// The callback must return the opened package file
    InstOpenFile,
    InstCloseFile,
    InstStart,
    InstProgress,
    InstStop,
    UninstStart,
    UninstProgress,
    UninstStop,
    ScriptStart,
    ScriptStop,
    ScriptError,
    UnpackError,
}

/// One notification emitted during `run()`
#[derive(Debug, Clone, Copy)]
pub struct Notification<'n> {
    pub kind: CallbackKind,
    /// Header the notification is about
    pub header: Option<HeaderHandle>,
    /// Package name from that header
    pub name: &'n str,
    /// Bytes or items processed so far
    pub amount: u64,
    /// Total bytes or items
    pub total: u64,
    /// Key of the element, if the element has one
    pub key: Option<ElementKey>,
    /// Scriptlet for `ScriptStart`, `ScriptStop` and `ScriptError`
    pub script: Option<ScriptletKind>,
    /// Scriptlet exit status for `ScriptError`
    pub status: i32,
}

impl<'n> Notification<'n> {
    pub fn new(kind: CallbackKind, amount: u64, total: u64) -> Self {
        Self {
            kind,
            header: None,
            name: "",
            amount,
            total,
            key: None,
            script: None,
            status: 0,
        }
    }

    pub fn about(mut self, header: HeaderHandle, name: &'n str, key: Option<ElementKey>) -> Self {
        self.header = Some(header);
        self.name = name;
        self.key = key;
        self
    }

    pub fn scriptlet(mut self, kind: ScriptletKind, status: i32) -> Self {
        self.script = Some(kind);
        self.status = status;
        self
    }
}

/// Notification sink passed to `run()`
///
/// Returns the opened package file for `InstOpenFile` and `None` otherwise.
pub type NotifyFn<'f> = dyn FnMut(&Notification<'_>) -> Option<File> + 'f;

/// Per-run settings supplied by the engine
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions<'a> {
    /// Problem kinds ignored during preparation
    pub ignore: ProblemFilter,
    /// Destination for scriptlet stdout/stderr
    pub script_out: Option<&'a File>,
}

/// Native transaction set driven by the engine
pub trait TransactionSet {
    /// Set the install root; fails for relative or missing directories
    fn set_root_dir(&mut self, root: &Path) -> Result<()>;

    fn root_dir(&self) -> &Path;

    fn flags(&self) -> TransactionFlags;

    /// Returns the previous flags
    fn set_flags(&mut self, flags: TransactionFlags) -> TransactionFlags;

    fn vs_flags(&self) -> VerifyFlags;

    /// Returns the previous flags
    fn set_vs_flags(&mut self, flags: VerifyFlags) -> VerifyFlags;

    /// Transaction id (time stamp of the last run, 0 before)
    fn transaction_id(&self) -> u32;

    /// Read the header of a package file
    fn read_package_file(&mut self, path: &Path) -> Result<HeaderHandle>;

    /// Read the header of an installed package by database id
    fn read_installed(&mut self, db_id: u32) -> Result<HeaderHandle>;

    fn header(&self, handle: HeaderHandle) -> Option<&Header>;

    fn add_install(&mut self, handle: HeaderHandle, key: ElementKey, upgrade: bool) -> Result<()>;

    fn add_reinstall(&mut self, handle: HeaderHandle, key: ElementKey) -> Result<()>;

    fn add_erase(&mut self, handle: HeaderHandle) -> Result<()>;

    fn element_count(&self) -> usize;

    /// Dependency check; true when no problems were found
    fn check(&mut self) -> bool;

    /// Problems of the last `check()` or `run()`
    fn problems(&self) -> ProblemSet;

    /// Execute the elements
    ///
    /// Returns 0 on success, a negative value on fatal errors and the number
    /// of problems when preparation found problems.
    fn run(&mut self, options: RunOptions<'_>, notify: &mut NotifyFn<'_>) -> i32;
}
