// src/ts/arena.rs

//! Header arena
//!
//! Owns every header read by a transaction set and hands out integer handles.
//! Headers are interned by origin, so reading the same file (canonical path)
//! or the same database row twice yields the same handle.

use crate::header::{Header, HeaderOrigin};
use std::collections::HashMap;
use std::fmt;

/// Opaque handle to a header owned by a [`HeaderArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderHandle(u32);

impl HeaderHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HeaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct HeaderArena {
    headers: Vec<Header>,
    by_origin: HashMap<HeaderOrigin, HeaderHandle>,
}

impl HeaderArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a header, or return the handle of the header with the same origin
    pub fn intern(&mut self, header: Header) -> HeaderHandle {
        if let Some(handle) = self.by_origin.get(&header.origin) {
            return *handle;
        }

        let handle = HeaderHandle(self.headers.len() as u32);
        self.by_origin.insert(header.origin.clone(), handle);
        self.headers.push(header);
        handle
    }

    pub fn lookup(&self, origin: &HeaderOrigin) -> Option<HeaderHandle> {
        self.by_origin.get(origin).copied()
    }

    pub fn get(&self, handle: HeaderHandle) -> Option<&Header> {
        self.headers.get(handle.index())
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
