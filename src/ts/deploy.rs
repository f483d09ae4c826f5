// src/ts/deploy.rs

//! Filesystem side of element execution: payload unpacking, file removal
//! and scriptlet execution.

use crate::error::{Error, Result};
use crate::header::{HeaderFile, S_IFDIR, S_IFLNK, S_IFMT, ScriptletKind};
use crate::packages::rpm::PayloadFile;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Path of a package file below the install root
///
/// `None` when the path would leave the root (`..`, prefixes) or names the
/// root itself.
pub(crate) fn root_path(root: &Path, path: &str) -> Option<PathBuf> {
    let mut dest = root.to_path_buf();
    let mut depth = 0;
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => {
                dest.push(part);
                depth += 1;
            }
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(dest)
}

fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit())
}

fn replace_with_symlink(target: &str, link: &Path) -> io::Result<()> {
    if let Ok(metadata) = fs::symlink_metadata(link) {
        if metadata.is_dir() && !metadata.file_type().is_symlink() {
            fs::remove_dir(link)?;
        } else {
            fs::remove_file(link)?;
        }
    }
    std::os::unix::fs::symlink(target, link)
}

/// Write a regular file atomically: temp file in the target directory, then rename
fn write_atomic(dest: &Path, content: &[u8], permissions: u32) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("/"));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file()
        .set_permissions(fs::Permissions::from_mode(permissions))?;
    temp.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Unpack `payload` below `root`
///
/// `progress` receives the running byte count after each regular file.
/// Payload digests are checked against `files` unless `verify` is false.
pub(crate) fn unpack(
    root: &Path,
    payload: &[PayloadFile],
    files: &[HeaderFile],
    verify: bool,
    progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    let digests: HashMap<&str, &str> = files
        .iter()
        .map(|f| (f.path.as_str(), f.digest.as_str()))
        .collect();

    let mut written = 0u64;
    for file in payload {
        let dest = root_path(root, &file.path).ok_or_else(|| Error::PackageFormatError {
            path: PathBuf::from(&file.path),
            reason: "payload path escapes the install root".to_string(),
        })?;
        match file.mode & S_IFMT {
            S_IFDIR => {
                fs::create_dir_all(&dest)?;
                fs::set_permissions(&dest, fs::Permissions::from_mode(file.mode & 0o7777))?;
            }
            S_IFLNK => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let target = String::from_utf8_lossy(&file.content);
                replace_with_symlink(&target, &dest)?;
            }
            _ => {
                if verify {
                    if let Some(expected) = digests.get(file.path.as_str()).filter(|d| is_sha256_hex(d)) {
                        let actual = format!("{:x}", Sha256::digest(&file.content));
                        if !actual.eq_ignore_ascii_case(expected) {
                            return Err(Error::Io(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("digest mismatch for {}", file.path),
                            )));
                        }
                    }
                }
                write_atomic(&dest, &file.content, file.mode & 0o7777)?;
                written += file.content.len() as u64;
                progress(written);
            }
        }
        debug!("Unpacked {}", dest.display());
    }

    Ok(written)
}

/// Remove the files of an erased package
///
/// Paths in `keep` still belong to another package and stay. Directories are
/// removed only when empty, deepest first.
pub(crate) fn remove_files(root: &Path, files: &[HeaderFile], keep: &dyn Fn(&str) -> bool) -> usize {
    let mut removed = 0;

    let mut dirs: Vec<&HeaderFile> = Vec::new();
    for file in files.iter().filter(|f| !keep(&f.path)) {
        if file.is_dir() {
            dirs.push(file);
            continue;
        }
        let Some(path) = root_path(root, &file.path) else {
            warn!("Skipping {} outside the install root", file.path);
            continue;
        };
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    dirs.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
    for dir in dirs {
        let Some(path) = root_path(root, &dir.path) else {
            warn!("Skipping {} outside the install root", dir.path);
            continue;
        };
        if fs::remove_dir(path).is_ok() {
            removed += 1;
        }
    }

    removed
}

/// Run a scriptlet body with `/bin/sh`, chrooted into `root` unless it is `/`
///
/// The shell sees the package name as `$0` and the number of instances of
/// the package left after the operation as `$1`. Output goes to `out` when
/// given. Returns the exit code, -1 when killed by a signal.
pub fn run_scriptlet(
    root: &Path,
    kind: ScriptletKind,
    body: &str,
    name: &str,
    count: u32,
    out: Option<&File>,
) -> Result<i32> {
    let mut cmd = if root == Path::new("/") {
        Command::new("/bin/sh")
    } else {
        let mut chroot = Command::new("chroot");
        chroot.arg(root).arg("/bin/sh");
        chroot
    };

    cmd.arg("-c")
        .arg(body)
        .arg(name)
        .arg(count.to_string())
        .current_dir("/")
        .stdin(Stdio::null());

    if let Some(file) = out {
        cmd.stdout(Stdio::from(file.try_clone()?));
        cmd.stderr(Stdio::from(file.try_clone()?));
    }

    debug!("Running {} scriptlet of {}", kind, name);
    let status = cmd.status()?;
    Ok(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};
    use tempfile::TempDir;

    fn header_file(path: &str, mode: u32) -> HeaderFile {
        HeaderFile {
            path: path.to_string(),
            mode,
            size: 0,
            digest: String::new(),
        }
    }

    #[test]
    fn test_scriptlet_output_and_exit_code() {
        let mut out = tempfile::tempfile().unwrap();

        let rc = run_scriptlet(
            Path::new("/"),
            ScriptletKind::PostInstall,
            "echo hello $0 $1",
            "foo",
            1,
            Some(&out),
        )
        .unwrap();
        assert_eq!(rc, 0);

        out.seek(SeekFrom::Start(0)).unwrap();
        let mut text = String::new();
        out.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello foo 1\n");

        let rc = run_scriptlet(Path::new("/"), ScriptletKind::PreInstall, "exit 3", "foo", 1, None)
            .unwrap();
        assert_eq!(rc, 3);
    }

    #[test]
    fn test_unpack_and_remove() {
        let root = TempDir::new().unwrap();
        let content = b"config".to_vec();
        let digest = format!("{:x}", Sha256::digest(&content));

        let payload = vec![
            PayloadFile {
                path: "/etc/foo".to_string(),
                mode: S_IFDIR | 0o755,
                content: vec![],
            },
            PayloadFile {
                path: "/etc/foo/foo.conf".to_string(),
                mode: 0o100644,
                content: content.clone(),
            },
            PayloadFile {
                path: "/etc/foo/link".to_string(),
                mode: S_IFLNK | 0o777,
                content: b"foo.conf".to_vec(),
            },
        ];
        let mut files = vec![
            header_file("/etc/foo", S_IFDIR | 0o755),
            header_file("/etc/foo/foo.conf", 0o100644),
            header_file("/etc/foo/link", S_IFLNK | 0o777),
        ];
        files[1].digest = digest;

        let mut seen = Vec::new();
        let written = unpack(root.path(), &payload, &files, true, &mut |n| seen.push(n)).unwrap();
        assert_eq!(written, 6);
        assert_eq!(seen, vec![6]);

        let conf = root.path().join("etc/foo/foo.conf");
        assert_eq!(fs::read(&conf).unwrap(), b"config");
        assert_eq!(
            fs::read_link(root.path().join("etc/foo/link")).unwrap(),
            PathBuf::from("foo.conf")
        );

        let removed = remove_files(root.path(), &files, &|_| false);
        assert_eq!(removed, 3);
        assert!(!root.path().join("etc/foo").exists());
    }

    #[test]
    fn test_remove_keeps_shared_paths() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("usr/share")).unwrap();
        fs::write(root.path().join("usr/share/a"), b"a").unwrap();
        fs::write(root.path().join("usr/share/b"), b"b").unwrap();

        let files = vec![
            header_file("/usr/share", S_IFDIR | 0o755),
            header_file("/usr/share/a", 0o100644),
            header_file("/usr/share/b", 0o100644),
        ];
        let removed = remove_files(root.path(), &files, &|p| p == "/usr/share/b");

        assert_eq!(removed, 1);
        assert!(root.path().join("usr/share/b").exists());
        assert!(root.path().join("usr/share").exists());
    }

    #[test]
    fn test_root_path_stays_below_root() {
        let root = Path::new("/srv/root");
        assert_eq!(root_path(root, "/usr/bin/foo"), Some(PathBuf::from("/srv/root/usr/bin/foo")));
        assert_eq!(root_path(root, "./etc//foo.conf"), Some(PathBuf::from("/srv/root/etc/foo.conf")));
        assert_eq!(root_path(root, "/../escaped.txt"), None);
        assert_eq!(root_path(root, "/usr/../../etc/passwd"), None);
        assert_eq!(root_path(root, "/"), None);
    }

    #[test]
    fn test_unpack_rejects_paths_outside_root() {
        let base = TempDir::new().unwrap();
        let root = base.path().join("root");
        fs::create_dir(&root).unwrap();

        let payload = vec![PayloadFile {
            path: "/../escaped.txt".to_string(),
            mode: 0o100644,
            content: b"out".to_vec(),
        }];
        let files = vec![header_file("/../escaped.txt", 0o100644)];

        let err = unpack(&root, &payload, &files, true, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::PackageFormatError { .. }));
        assert!(!base.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_remove_skips_paths_outside_root() {
        let base = TempDir::new().unwrap();
        let root = base.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(base.path().join("victim"), b"keep").unwrap();

        let files = vec![header_file("/../victim", 0o100644)];
        assert_eq!(remove_files(&root, &files, &|_| false), 0);
        assert!(base.path().join("victim").exists());
    }

    #[test]
    fn test_digest_mismatch_is_rejected() {
        let root = TempDir::new().unwrap();
        let payload = vec![PayloadFile {
            path: "/bin/tool".to_string(),
            mode: 0o100755,
            content: b"tampered".to_vec(),
        }];
        let mut files = vec![header_file("/bin/tool", 0o100755)];
        files[0].digest = "0".repeat(64);

        assert!(unpack(root.path(), &payload, &files, true, &mut |_| {}).is_err());
        assert!(unpack(root.path(), &payload, &files, false, &mut |_| {}).is_ok());
    }
}
