// src/ts/check.rs

//! Dependency, conflict and file-conflict checks
//!
//! Works on the package set as it will look after the transaction:
//! installed packages, minus erased and replaced ones, plus added ones.

use super::{ElementKey, ElementKind, ProblemFilter};
use crate::header::{Dependency, Header};
use crate::problem::{ProblemKind, ProblemRecord};
use std::collections::{HashMap, HashSet};

/// A package added by an install, upgrade or reinstall element
pub(crate) struct AddedPackage<'h> {
    pub header: &'h Header,
    pub key: Option<ElementKey>,
    pub kind: ElementKind,
    /// Installed headers this element replaces
    pub replaces: Vec<&'h Header>,
}

pub(crate) struct Universe<'h> {
    installed: Vec<&'h Header>,
    removed: HashSet<u32>,
    added: Vec<AddedPackage<'h>>,
}

/// rpm architecture name of the running host
pub(crate) fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i686",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Can a package built for `pkg_arch` be installed on `host`?
pub(crate) fn arch_compatible(pkg_arch: &str, host: &str) -> bool {
    const COMPAT: &[(&str, &[&str])] = &[
        ("x86_64", &["i686", "i586", "i486", "i386", "athlon"]),
        ("i686", &["i586", "i486", "i386", "athlon"]),
        ("aarch64", &[]),
        ("ppc64le", &[]),
        ("s390x", &[]),
    ];

    if pkg_arch == "noarch" || pkg_arch == host {
        return true;
    }

    COMPAT
        .iter()
        .find(|(h, _)| *h == host)
        .is_some_and(|(_, compatible)| compatible.contains(&pkg_arch))
}

fn push_unique(problems: &mut Vec<ProblemRecord>, record: ProblemRecord) {
    if !problems.contains(&record) {
        problems.push(record);
    }
}

impl<'h> Universe<'h> {
    pub fn new(installed: Vec<&'h Header>, removed: HashSet<u32>, added: Vec<AddedPackage<'h>>) -> Self {
        Self {
            installed,
            removed,
            added,
        }
    }

    /// Installed packages that survive the transaction
    fn remaining(&self) -> impl Iterator<Item = &'h Header> + '_ {
        self.installed
            .iter()
            .copied()
            .filter(|h| h.db_id().is_none_or(|id| !self.removed.contains(&id)))
    }

    /// Every package present after the transaction
    fn post(&self) -> impl Iterator<Item = &'h Header> + '_ {
        self.remaining().chain(self.added.iter().map(|a| a.header))
    }

    fn satisfied_after(&self, dep: &Dependency) -> bool {
        self.post().any(|h| h.satisfies(dep))
    }

    fn satisfied_before(&self, dep: &Dependency) -> bool {
        self.installed.iter().any(|h| h.satisfies(dep))
    }

    /// Unsatisfied requirements and conflicts
    pub fn dependency_problems(&self) -> Vec<ProblemRecord> {
        let mut problems = Vec::new();

        for added in &self.added {
            for req in added.header.requires.iter().filter(|r| !r.is_rpmlib()) {
                if !self.satisfied_after(req) {
                    push_unique(
                        &mut problems,
                        ProblemRecord::new(ProblemKind::Requires, added.header.nevra(), req.to_string())
                            .with_key(added.key),
                    );
                }
            }
        }

        // Installed packages broken by what the transaction takes away
        for pkg in self.remaining() {
            for req in pkg.requires.iter().filter(|r| !r.is_rpmlib()) {
                if !self.satisfied_after(req) && self.satisfied_before(req) {
                    push_unique(
                        &mut problems,
                        ProblemRecord::new(ProblemKind::Requires, pkg.nevra(), req.to_string()),
                    );
                }
            }
        }

        for added in &self.added {
            for conflict in &added.header.conflicts {
                let hit = self
                    .post()
                    .any(|other| !std::ptr::eq(other, added.header) && other.satisfies(conflict));
                if hit {
                    push_unique(
                        &mut problems,
                        ProblemRecord::new(ProblemKind::Conflict, added.header.nevra(), conflict.to_string())
                            .with_key(added.key),
                    );
                }
            }
        }

        for pkg in self.remaining() {
            for conflict in &pkg.conflicts {
                for added in self.added.iter().filter(|a| a.header.satisfies(conflict)) {
                    push_unique(
                        &mut problems,
                        ProblemRecord::new(ProblemKind::Conflict, pkg.nevra(), conflict.to_string())
                            .with_key(added.key),
                    );
                }
            }
        }

        problems
    }

    /// Problems detected while preparing `run()`, minus the ignored kinds
    pub fn prepare_problems(&self, host: &str, ignore: ProblemFilter) -> Vec<ProblemRecord> {
        let mut problems = Vec::new();

        for added in &self.added {
            let header = added.header;

            if !ignore.contains(ProblemFilter::IGNORE_ARCH) && !arch_compatible(&header.arch, host) {
                push_unique(
                    &mut problems,
                    ProblemRecord::new(ProblemKind::BadArch, header.nevra(), header.arch.clone())
                        .with_key(added.key),
                );
            }

            if added.kind == ElementKind::Install
                && !ignore.contains(ProblemFilter::REPLACE_PKG)
                && self.remaining().any(|h| h.same_nevra(header))
            {
                push_unique(
                    &mut problems,
                    ProblemRecord::new(ProblemKind::PkgInstalled, header.nevra(), "")
                        .with_key(added.key),
                );
            }

            if added.kind == ElementKind::Upgrade && !ignore.contains(ProblemFilter::OLD_PACKAGE) {
                for old in &added.replaces {
                    if old.evr().compare(&header.evr()).is_gt() {
                        push_unique(
                            &mut problems,
                            ProblemRecord::new(ProblemKind::OldPackage, header.nevra(), old.nevra())
                                .with_key(added.key),
                        );
                    }
                }
            }
        }

        self.file_conflicts(ignore, &mut problems);
        problems
    }

    fn file_conflicts(&self, ignore: ProblemFilter, problems: &mut Vec<ProblemRecord>) {
        // path -> (index of first added package shipping it, digest, mode)
        let mut shipped: HashMap<&str, (usize, &str, u32)> = HashMap::new();

        for (index, added) in self.added.iter().enumerate() {
            for file in added.header.files.iter().filter(|f| !f.is_dir()) {
                match shipped.get(file.path.as_str()) {
                    Some(&(first, digest, mode)) => {
                        let same = digest == file.digest && mode == file.mode;
                        if !same && !ignore.contains(ProblemFilter::REPLACE_NEW_FILES) {
                            push_unique(
                                problems,
                                ProblemRecord::new(
                                    ProblemKind::NewFileConflict,
                                    added.header.nevra(),
                                    self.added[first].header.nevra(),
                                )
                                .with_path(file.path.clone())
                                .with_key(added.key),
                            );
                        }
                    }
                    None => {
                        shipped.insert(file.path.as_str(), (index, file.digest.as_str(), file.mode));
                    }
                }

                if ignore.contains(ProblemFilter::REPLACE_OLD_FILES) {
                    continue;
                }

                for owner in self.remaining() {
                    let clash = owner
                        .files
                        .iter()
                        .any(|f| f.path == file.path && !f.is_dir() && f.digest != file.digest);
                    if clash {
                        push_unique(
                            problems,
                            ProblemRecord::new(ProblemKind::FileConflict, added.header.nevra(), owner.nevra())
                                .with_path(file.path.clone())
                                .with_key(added.key),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::header;
    use crate::header::{DepFlags, HeaderFile, HeaderOrigin};

    fn installed(name: &str, version: &str, id: u32) -> Header {
        let mut h = header(name, version);
        h.origin = HeaderOrigin::Installed(id);
        h
    }

    fn add<'h>(header: &'h Header, kind: ElementKind, key: usize) -> AddedPackage<'h> {
        AddedPackage {
            header,
            key: Some(ElementKey(key)),
            kind,
            replaces: vec![],
        }
    }

    fn file(path: &str, digest: &str) -> HeaderFile {
        HeaderFile {
            path: path.to_string(),
            mode: 0o100644,
            size: 4,
            digest: digest.to_string(),
        }
    }

    #[test]
    fn test_missing_requirement() {
        let mut foo = header("foo", "1.0");
        foo.requires.push(Dependency::any("bar"));

        let universe = Universe::new(vec![], HashSet::new(), vec![add(&foo, ElementKind::Install, 0)]);
        let problems = universe.dependency_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::Requires);
        assert_eq!(problems[0].to_string(), "bar is needed by foo-1.0-1.noarch");
        assert_eq!(problems[0].key, Some(ElementKey(0)));
    }

    #[test]
    fn test_requirement_met_by_installed_or_added() {
        let mut foo = header("foo", "1.0");
        foo.requires.push(Dependency::new("bar", DepFlags::GREATER | DepFlags::EQUAL, "2"));
        foo.requires.push(Dependency::any("rpmlib(CompressedFileNames)"));
        let bar = installed("bar", "2.1", 1);

        let universe = Universe::new(vec![&bar], HashSet::new(), vec![add(&foo, ElementKind::Install, 0)]);
        assert!(universe.dependency_problems().is_empty());

        let new_bar = header("bar", "3");
        let universe = Universe::new(
            vec![],
            HashSet::new(),
            vec![add(&foo, ElementKind::Install, 0), add(&new_bar, ElementKind::Install, 1)],
        );
        assert!(universe.dependency_problems().is_empty());
    }

    #[test]
    fn test_erase_breaks_installed_dependent() {
        let lib = installed("libfoo", "1.0", 1);
        let mut app = installed("app", "1.0", 2);
        app.requires.push(Dependency::any("libfoo"));

        let removed: HashSet<u32> = [1].into_iter().collect();
        let universe = Universe::new(vec![&lib, &app], removed, vec![]);
        let problems = universe.dependency_problems();

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].to_string(), "libfoo is needed by app-1.0-1.noarch");
    }

    #[test]
    fn test_already_broken_dependency_not_reported() {
        let mut app = installed("app", "1.0", 2);
        app.requires.push(Dependency::any("never-there"));

        let universe = Universe::new(vec![&app], HashSet::new(), vec![]);
        assert!(universe.dependency_problems().is_empty());
    }

    #[test]
    fn test_conflicts_both_directions() {
        let mut foo = header("foo", "1.0");
        foo.conflicts.push(Dependency::any("bar"));
        let bar = installed("bar", "1.0", 1);

        let universe = Universe::new(vec![&bar], HashSet::new(), vec![add(&foo, ElementKind::Install, 0)]);
        let problems = universe.dependency_problems();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].to_string(), "bar conflicts with foo-1.0-1.noarch");

        let mut old = installed("old", "1.0", 3);
        old.conflicts.push(Dependency::any("baz"));
        let baz = header("baz", "1.0");
        let universe = Universe::new(vec![&old], HashSet::new(), vec![add(&baz, ElementKind::Install, 4)]);
        let problems = universe.dependency_problems();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].package, "old-1.0-1.noarch");
        assert_eq!(problems[0].key, Some(ElementKey(4)));
    }

    #[test]
    fn test_self_conflict_ignored() {
        let mut foo = header("foo", "1.0");
        foo.conflicts.push(Dependency::any("foo"));

        let universe = Universe::new(vec![], HashSet::new(), vec![add(&foo, ElementKind::Install, 0)]);
        assert!(universe.dependency_problems().is_empty());
    }

    #[test]
    fn test_prepare_pkg_installed_and_old_package() {
        let current = installed("foo", "2.0", 1);
        let same = header("foo", "2.0");

        let universe = Universe::new(vec![&current], HashSet::new(), vec![add(&same, ElementKind::Install, 0)]);
        let problems = universe.prepare_problems("x86_64", ProblemFilter::empty());
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::PkgInstalled);
        assert!(universe.prepare_problems("x86_64", ProblemFilter::REPLACE_PKG).is_empty());

        let older = header("foo", "1.0");
        let mut upgrade = add(&older, ElementKind::Upgrade, 0);
        upgrade.replaces.push(&current);
        let removed: HashSet<u32> = [1].into_iter().collect();
        let universe = Universe::new(vec![&current], removed, vec![upgrade]);
        let problems = universe.prepare_problems("x86_64", ProblemFilter::empty());
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::OldPackage);
        assert!(universe.prepare_problems("x86_64", ProblemFilter::OLD_PACKAGE).is_empty());
    }

    #[test]
    fn test_prepare_bad_arch() {
        let mut foo = header("foo", "1.0");
        foo.arch = "s390x".to_string();

        let universe = Universe::new(vec![], HashSet::new(), vec![add(&foo, ElementKind::Install, 0)]);
        let problems = universe.prepare_problems("x86_64", ProblemFilter::empty());
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::BadArch);
        assert!(universe.prepare_problems("x86_64", ProblemFilter::IGNORE_ARCH).is_empty());
    }

    #[test]
    fn test_file_conflicts() {
        let mut foo = header("foo", "1.0");
        foo.files.push(file("/etc/shared.conf", "aaaa"));
        let mut bar = header("bar", "1.0");
        bar.files.push(file("/etc/shared.conf", "bbbb"));
        let mut old = installed("old", "1.0", 1);
        old.files.push(file("/etc/shared.conf", "cccc"));

        let universe = Universe::new(
            vec![&old],
            HashSet::new(),
            vec![add(&foo, ElementKind::Install, 0), add(&bar, ElementKind::Install, 1)],
        );
        let problems = universe.prepare_problems("x86_64", ProblemFilter::empty());
        let kinds: Vec<ProblemKind> = problems.iter().map(|p| p.kind).collect();
        assert!(kinds.contains(&ProblemKind::NewFileConflict));
        assert!(kinds.contains(&ProblemKind::FileConflict));

        let filter = ProblemFilter::REPLACE_NEW_FILES | ProblemFilter::REPLACE_OLD_FILES;
        assert!(universe.prepare_problems("x86_64", filter).is_empty());
    }

    #[test]
    fn test_identical_files_do_not_conflict() {
        let mut foo = header("foo", "1.0");
        foo.files.push(file("/usr/share/licenses/MIT", "same"));
        let mut bar = header("bar", "1.0");
        bar.files.push(file("/usr/share/licenses/MIT", "same"));

        let universe = Universe::new(
            vec![],
            HashSet::new(),
            vec![add(&foo, ElementKind::Install, 0), add(&bar, ElementKind::Install, 1)],
        );
        assert!(universe.prepare_problems("x86_64", ProblemFilter::empty()).is_empty());
    }

    #[test]
    fn test_arch_compatibility() {
        assert!(arch_compatible("noarch", "aarch64"));
        assert!(arch_compatible("x86_64", "x86_64"));
        assert!(arch_compatible("i686", "x86_64"));
        assert!(!arch_compatible("x86_64", "i686"));
        assert!(!arch_compatible("aarch64", "x86_64"));
    }
}
