use crate::output::Mark;
use crate::revnum::RevNum;

/// Index of the trunk pseudo-branch in [`Database::tags`].
pub(crate) const TRUNK: usize = 0;

/// In-memory store of everything the conversion works on. Entities live
/// in typed arenas; every cross-reference is an index into one of them.
pub(crate) struct Database {
    pub(crate) files: Vec<File>,
    pub(crate) versions: Vec<Version>,
    pub(crate) tags: Vec<Tag>,
    pub(crate) changesets: Vec<Changeset>,
}

pub(crate) struct File {
    pub(crate) path: String,
    /// Versions of this file, real ones first, in log order.
    pub(crate) versions: Vec<usize>,
}

pub(crate) struct Version {
    pub(crate) file: usize,
    pub(crate) rev: RevNum,
    pub(crate) time: i64,
    pub(crate) author: String,
    pub(crate) log: String,
    /// Tombstone: the revision removes the file.
    pub(crate) dead: bool,
    /// Executable bit, learned from the server's mode line at fetch time.
    pub(crate) exec: bool,
    pub(crate) parent: Option<usize>,
    /// The branch this version lives on (index into `tags`).
    pub(crate) branch: usize,
    /// For a trunk-side shadow of a vendor-branch revision, the real
    /// vendor version it stands for.
    pub(crate) implicit_merge: Option<usize>,
    /// Blob identity once fetched; assigned at most once.
    pub(crate) mark: Option<Mark>,
    /// The commit changeset this version was grouped into.
    pub(crate) changeset: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangesetKind {
    Commit,
    /// A symbolic tag; the index borrows the identity of a [`Tag`].
    Tag(usize),
    /// The creation point of a branch.
    Branch(usize),
}

pub(crate) struct Changeset {
    pub(crate) kind: ChangesetKind,
    pub(crate) time: i64,
    /// Member versions; empty for tag/branch kinds.
    pub(crate) versions: Vec<usize>,
    pub(crate) mark: Option<Mark>,
    /// Number of parent changesets not yet emitted.
    pub(crate) unready_count: usize,
    pub(crate) children: Vec<usize>,
    pub(crate) emitted: bool,
}

impl Changeset {
    pub(crate) fn new(kind: ChangesetKind, time: i64) -> Self {
        Self {
            kind,
            time,
            versions: Vec::new(),
            mark: None,
            unready_count: 0,
            children: Vec::new(),
            emitted: false,
        }
    }
}

pub(crate) struct Tag {
    /// The empty string denotes the trunk.
    pub(crate) name: String,
    pub(crate) is_branch: bool,
    /// Per-file version the symbol points at (for branches, the branch
    /// point), sorted by file index.
    pub(crate) tag_files: Vec<usize>,
    /// This tag's own changeset, set when changesets are created.
    pub(crate) changeset: usize,
    /// The changeset this tag was taken from, chosen by the analyzer.
    pub(crate) parent: Option<usize>,
    pub(crate) is_released: bool,
    /// Set when fix-up commits were synthesized for this tag.
    pub(crate) fixup: bool,
    /// Most recent changeset on this branch.
    pub(crate) last: Option<usize>,
    /// For branches: one slot per file, the version currently at the
    /// branch tip (possibly a tombstone).
    pub(crate) branch_versions: Option<Vec<Option<usize>>>,
    /// Reconciliations still owed before this tag is exact, sorted by
    /// target time; `fixups_applied` marks the flushed prefix.
    pub(crate) fixups: Vec<FixupVer>,
    pub(crate) fixups_applied: usize,
}

impl Tag {
    pub(crate) fn new(name: String, is_branch: bool) -> Self {
        Self {
            name,
            is_branch,
            tag_files: Vec::new(),
            changeset: usize::MAX,
            parent: None,
            is_released: false,
            fixup: false,
            last: None,
            branch_versions: None,
            fixups: Vec::new(),
            fixups_applied: 0,
        }
    }
}

/// A single file that must be reconciled before its tag is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FixupVer {
    pub(crate) file: usize,
    /// The live target version; `None` means the file must be absent.
    pub(crate) version: Option<usize>,
    /// Target timestamp; `i64::MIN` when the target is absent, so
    /// deletions sort first.
    pub(crate) time: i64,
}

impl Database {
    pub(crate) fn new() -> Self {
        Self {
            files: Vec::new(),
            versions: Vec::new(),
            tags: vec![Tag::new(String::new(), true)],
            changesets: Vec::new(),
        }
    }

    /// Files are sorted by path at build time.
    pub(crate) fn find_file(&self, path: &str) -> Option<usize> {
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(path))
            .ok()
    }

    /// The first version of `file` with the given revision number. Vendor
    /// shadows share a revision string with the real version but are
    /// appended after it, so this finds the real one.
    pub(crate) fn find_version(&self, file: usize, rev: &RevNum) -> Option<usize> {
        self.files[file]
            .versions
            .iter()
            .copied()
            .find(|&v| self.versions[v].rev == *rev)
    }

    /// Resolves a version through `implicit_merge` to its canonical
    /// representative.
    pub(crate) fn version_normalise(&self, mut v: usize) -> usize {
        while let Some(m) = self.versions[v].implicit_merge {
            v = m;
        }
        v
    }

    /// `version_normalise` composed with the tombstone check: the version
    /// that is actually present, or `None` for dead/absent.
    pub(crate) fn version_live(&self, v: Option<usize>) -> Option<usize> {
        let v = self.version_normalise(v?);
        if self.versions[v].dead {
            None
        } else {
            Some(v)
        }
    }

    /// Display name for a tag's git ref.
    pub(crate) fn ref_name(&self, tag: usize) -> String {
        let t = &self.tags[tag];
        let kind = if t.is_branch { "heads" } else { "tags" };
        let name = if t.name.is_empty() {
            "cvs_master"
        } else {
            t.name.as_str()
        };
        format!("refs/{kind}/{name}")
    }
}
