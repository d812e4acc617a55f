//! Compact in-memory repository construction for tests, routed through
//! the real rlog-record import so the whole pipeline is exercised.

use std::collections::BTreeMap;

use super::database::Database;
use super::import;
use crate::cvs::rlog::{RlogFile, RlogRevision};
use crate::revnum::RevNum;

pub(crate) struct DbBuilder {
    files: BTreeMap<String, RlogFile>,
}

impl DbBuilder {
    pub(crate) fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }

    fn file_mut(&mut self, path: &str) -> &mut RlogFile {
        self.files
            .entry(path.to_owned())
            .or_insert_with(|| RlogFile {
                path: path.to_owned(),
                symbols: Vec::new(),
                revisions: Vec::new(),
            })
    }

    pub(crate) fn version(
        mut self,
        path: &str,
        rev: &str,
        time: i64,
        author: &str,
        log: &str,
    ) -> Self {
        self.file_mut(path).revisions.push(RlogRevision {
            rev: RevNum::parse(rev).unwrap(),
            time,
            author: author.to_owned(),
            dead: false,
            log: log.to_owned(),
        });
        self
    }

    pub(crate) fn dead_version(
        mut self,
        path: &str,
        rev: &str,
        time: i64,
        author: &str,
        log: &str,
    ) -> Self {
        self.file_mut(path).revisions.push(RlogRevision {
            rev: RevNum::parse(rev).unwrap(),
            time,
            author: author.to_owned(),
            dead: true,
            log: log.to_owned(),
        });
        self
    }

    /// Adds a symbol to the named files. Branchness follows the revision
    /// number shape: `1.2.0.2` and odd-length numbers declare branches.
    pub(crate) fn tag(mut self, name: &str, files: &[(&str, &str)]) -> Self {
        for &(path, rev) in files {
            self.file_mut(path)
                .symbols
                .push((name.to_owned(), RevNum::parse(rev).unwrap()));
        }
        self
    }

    pub(crate) fn build(self) -> Database {
        import::build(self.files.into_values().collect()).unwrap()
    }
}
