// src/packages/rpm.rs

//! RPM package file reader
//!
//! Turns an RPM file into a `Header` for the transaction layer, and reads
//! the payload when an install element is executed.

use crate::error::{Error, Result};
use crate::header::{
    DepFlags, Dependency, Header, HeaderFile, HeaderOrigin, ScriptletKind, Scriptlets,
};
use crate::ts::VerifyFlags;
use rpm::{IndexTag, Package};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::debug;

/// A file taken from a package payload
#[derive(Debug, Clone)]
pub struct PayloadFile {
    pub path: String,
    pub mode: u32,
    pub content: Vec<u8>,
}

fn format_error(path: &Path, reason: impl ToString) -> Error {
    Error::PackageFormatError {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn convert_dependencies(deps: Vec<rpm::Dependency>) -> Vec<Dependency> {
    deps.into_iter()
        .map(|d| {
            let flags = DepFlags::from_bits_truncate(d.flags.bits());
            Dependency::new(d.name, flags, d.version)
        })
        .collect()
}

/// Extract file list from RPM package
fn extract_files(pkg: &Package) -> Vec<HeaderFile> {
    let mut files = Vec::new();

    if let Ok(file_entries) = pkg.metadata.get_file_entries() {
        for entry in file_entries {
            files.push(HeaderFile {
                path: entry.path.to_string_lossy().to_string(),
                mode: entry.mode.raw_mode() as u32,
                size: entry.size as u64,
                digest: entry
                    .digest
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
            });
        }
    }

    files
}

fn extract_scripts(pkg: &Package) -> Scriptlets {
    let mut scripts = Scriptlets::default();
    let tags = [
        (ScriptletKind::PreInstall, IndexTag::RPMTAG_PREIN),
        (ScriptletKind::PostInstall, IndexTag::RPMTAG_POSTIN),
        (ScriptletKind::PreUninstall, IndexTag::RPMTAG_PREUN),
        (ScriptletKind::PostUninstall, IndexTag::RPMTAG_POSTUN),
    ];

    for (kind, tag) in tags {
        if let Ok(body) = pkg.metadata.header.get_entry_data_as_string(tag) {
            if !body.trim().is_empty() {
                scripts.set(kind, body.to_string());
            }
        }
    }

    scripts
}

/// SHA-256 of a whole file, hex encoded
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Read the header of an RPM file
///
/// Fails with `PackageReadError` when the file can't be opened and with
/// `PackageFormatError` when it isn't a readable RPM. Unless `NODIGESTS` is
/// set the SHA-256 of the file is recorded as the package id.
pub fn read_header(path: &Path, vs_flags: VerifyFlags) -> Result<Header> {
    debug!("Reading RPM header: {}", path.display());

    let read_error = |source| Error::PackageReadError {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(read_error)?;
    let mut buf_reader = BufReader::new(file);
    let pkg = Package::parse(&mut buf_reader).map_err(|e| format_error(path, e))?;

    let name = pkg
        .metadata
        .get_name()
        .map_err(|e| format_error(path, e))?
        .to_string();
    let version = pkg
        .metadata
        .get_version()
        .map_err(|e| format_error(path, e))?
        .to_string();
    let release = pkg
        .metadata
        .get_release()
        .map_err(|e| format_error(path, e))?
        .to_string();
    let arch = pkg
        .metadata
        .get_arch()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| "noarch".to_string());
    // An explicit epoch of 0 is the same as no epoch
    let epoch = pkg.metadata.get_epoch().ok().filter(|e| *e != 0);

    let provides = convert_dependencies(pkg.metadata.get_provides().unwrap_or_default());
    let requires = convert_dependencies(pkg.metadata.get_requires().unwrap_or_default());
    let conflicts = convert_dependencies(pkg.metadata.get_conflicts().unwrap_or_default());

    let pkgid = if vs_flags.contains(VerifyFlags::NODIGESTS) {
        None
    } else {
        Some(file_sha256(path).map_err(read_error)?)
    };

    let canonical = path.canonicalize().map_err(read_error)?;

    let mut header = Header {
        name,
        epoch,
        version,
        release,
        arch,
        provides,
        requires,
        conflicts,
        files: extract_files(&pkg),
        scripts: extract_scripts(&pkg),
        pkgid,
        origin: HeaderOrigin::File(canonical),
    };
    header.ensure_self_provide();

    debug!(
        "Read header {} ({} files, {} requires)",
        header.nevra(),
        header.files.len(),
        header.requires.len()
    );

    Ok(header)
}

/// Read every payload file of an already opened RPM
pub fn read_payload(file: File, path_hint: &Path) -> Result<Vec<PayloadFile>> {
    let mut buf_reader = BufReader::new(file);
    let pkg = Package::parse(&mut buf_reader).map_err(|e| format_error(path_hint, e))?;

    let mut files = Vec::new();
    for entry in pkg.files().map_err(|e| format_error(path_hint, e))? {
        let entry = entry.map_err(|e| format_error(path_hint, e))?;
        files.push(PayloadFile {
            path: entry.metadata.path.to_string_lossy().to_string(),
            mode: entry.metadata.mode.raw_mode() as u32,
            content: entry.content,
        });
    }

    Ok(files)
}
