//! The emission loop: drains the ready-set heap in `(time, kind, id)`
//! order, writing commits, resets and fix-up commits to the fast-import
//! sink while keeping every branch's live state current.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::Write;

use super::database::{ChangesetKind, Database, FixupVer};
use super::fetch::BlobSource;
use super::fixup;
use crate::errors::Fatal;
use crate::output::FastImport;

pub(crate) struct Summary {
    pub(crate) emitted_commits: usize,
    pub(crate) total_changesets: usize,
    pub(crate) exact_branches: usize,
    pub(crate) exact_tags: usize,
    pub(crate) fixup_branches: usize,
    pub(crate) fixup_tags: usize,
}

pub(crate) fn run(
    db: &mut Database,
    fetcher: &mut dyn BlobSource,
    out: &mut FastImport<'_>,
    progress: &mut dyn Write,
) -> Result<Summary, Fatal> {
    Emitter {
        db,
        fetcher,
        out,
        progress,
        emitted_commits: 0,
    }
    .run()
}

struct Emitter<'a, 'b> {
    db: &'a mut Database,
    fetcher: &'a mut dyn BlobSource,
    out: &'a mut FastImport<'b>,
    progress: &'a mut dyn Write,
    emitted_commits: usize,
}

fn heap_key(db: &Database, cs: usize) -> Reverse<(i64, u8, usize)> {
    let changeset = &db.changesets[cs];
    let rank = match changeset.kind {
        ChangesetKind::Commit => 1,
        ChangesetKind::Tag(_) | ChangesetKind::Branch(_) => 0,
    };
    Reverse((changeset.time, rank, cs))
}

impl Emitter<'_, '_> {
    fn run(mut self) -> Result<Summary, Fatal> {
        let mut ready = BinaryHeap::new();
        for cs in 0..self.db.changesets.len() {
            if self.db.changesets[cs].unready_count == 0 {
                ready.push(heap_key(self.db, cs));
            }
        }

        while let Some(Reverse((_, _, cs))) = ready.pop() {
            debug_assert!(!self.db.changesets[cs].emitted);
            match self.db.changesets[cs].kind {
                ChangesetKind::Commit => {
                    self.emitted_commits += 1;
                    self.print_commit(cs)?;
                    self.update_branch_versions(cs);
                }
                ChangesetKind::Tag(t) | ChangesetKind::Branch(t) => {
                    self.db.tags[t].is_released = true;
                    self.print_tag(t)?;
                }
            }
            self.db.changesets[cs].emitted = true;

            let children = self.db.changesets[cs].children.clone();
            for child in children {
                self.db.changesets[child].unready_count -= 1;
                if self.db.changesets[child].unready_count == 0 {
                    ready.push(heap_key(self.db, child));
                }
            }
        }

        // Whatever a branch still owes is forced out now.
        for t in 0..self.db.tags.len() {
            if self.db.tags[t].is_branch {
                self.flush_branch_fixups(t, None)?;
            }
        }

        let mut summary = Summary {
            emitted_commits: self.emitted_commits,
            total_changesets: self.db.changesets.len(),
            exact_branches: 0,
            exact_tags: 0,
            fixup_branches: 0,
            fixup_tags: 0,
        };
        for tag in &self.db.tags {
            if !tag.is_released {
                tracing::warn!("tag {} was never released", tag.name);
            }
            match (tag.is_branch, tag.fixup) {
                (true, false) => summary.exact_branches += 1,
                (false, false) => summary.exact_tags += 1,
                (true, true) => summary.fixup_branches += 1,
                (false, true) => summary.fixup_tags += 1,
            }
        }
        Ok(summary)
    }

    fn print_commit(&mut self, cs: usize) -> Result<(), Fatal> {
        let branch = self.db.versions[self.db.changesets[cs].versions[0]].branch;
        let cs_time = self.db.changesets[cs].time;

        // Reconciliations due by now come first, so the branch state the
        // commit builds on is the one the tag snapshot demanded.
        self.flush_branch_fixups(branch, Some(cs_time))?;

        let mut fetch = Vec::new();
        let mut nil = true;
        for i in 0..self.db.changesets[cs].versions.len() {
            let v = self.db.changesets[cs].versions[i];
            let f = self.db.versions[v].file;
            let live = self.db.version_live(Some(v));
            let current = self
                .db
                .version_live(self.db.tags[branch].branch_versions.as_ref().unwrap()[f]);
            if live == current {
                continue;
            }
            nil = false;
            if let Some(lv) = live {
                if self.db.versions[lv].mark.is_none() {
                    fetch.push(lv);
                }
            }
        }

        if nil {
            // Nothing changes: no record, the changeset aliases the
            // branch tip.
            let last = self.db.tags[branch]
                .last
                .expect("branch changeset precedes its commits");
            self.db.changesets[cs].mark = self.db.changesets[last].mark;
            self.db.tags[branch].last = Some(cs);
            return Ok(());
        }

        writeln!(self.progress, "{} COMMIT", format_date(cs_time))?;

        self.fetcher.fetch(self.db, self.out, &fetch)?;

        self.db.tags[branch].last = Some(cs);

        let refname = self.db.ref_name(branch);
        let first = self.db.changesets[cs].versions[0];
        let author = self.db.versions[first].author.clone();
        let log = self.db.versions[first].log.clone();
        let mark = self.out.begin_commit(&refname, &author, cs_time, &log)?;
        self.db.changesets[cs].mark = Some(mark);

        for i in 0..self.db.changesets[cs].versions.len() {
            let v = self.db.changesets[cs].versions[i];
            let vv = self.db.version_normalise(v);
            let path = &self.db.files[self.db.versions[vv].file].path;
            if self.db.versions[vv].dead {
                self.out.delete(path)?;
            } else {
                let blob = self.db.versions[vv].mark.ok_or_else(|| {
                    Fatal::UnknownEntity(format!(
                        "no content for {} {}",
                        path, self.db.versions[vv].rev,
                    ))
                })?;
                self.out.modify(self.db.versions[vv].exec, blob, path)?;
            }
        }

        Ok(())
    }

    fn update_branch_versions(&mut self, cs: usize) {
        let branch = self.db.versions[self.db.changesets[cs].versions[0]].branch;
        for i in 0..self.db.changesets[cs].versions.len() {
            let v = self.db.changesets[cs].versions[i];
            let f = self.db.versions[v].file;
            self.db.tags[branch].branch_versions.as_mut().unwrap()[f] = Some(v);
        }
    }

    fn print_tag(&mut self, t: usize) -> Result<(), Fatal> {
        let tag_cs = self.db.tags[t].changeset;
        writeln!(
            self.progress,
            "{} {} {}",
            format_date(self.db.changesets[tag_cs].time),
            if self.db.tags[t].is_branch {
                "BRANCH"
            } else {
                "TAG"
            },
            if self.db.tags[t].name.is_empty() {
                "cvs_master"
            } else {
                self.db.tags[t].name.as_str()
            },
        )?;

        let parent = self.db.tags[t].parent;
        let parent_branch = match parent {
            None => None,
            Some(p) => match self.db.changesets[p].kind {
                ChangesetKind::Commit => {
                    Some(self.db.versions[self.db.changesets[p].versions[0]].branch)
                }
                ChangesetKind::Tag(pt) | ChangesetKind::Branch(pt) => Some(pt),
            },
        };

        let parent_mark = parent.and_then(|p| self.db.changesets[p].mark);
        self.db.changesets[tag_cs].mark = parent_mark;
        self.out.reset(&self.db.ref_name(t), parent_mark)?;
        self.db.tags[t].last = Some(tag_cs);

        // The parent branch's live state right now is the base the tag
        // must be reconciled against.
        let base = parent_branch.and_then(|b| self.db.tags[b].branch_versions.clone());
        fixup::create_fixups(self.db, base.as_deref(), t);

        if self.db.tags[t].is_branch {
            // Rewind to the parent's state; the fix-up commits restore
            // the branch's own snapshot as they fall due.
            let nfiles = self.db.files.len();
            self.db.tags[t].branch_versions =
                Some(base.clone().unwrap_or_else(|| vec![None; nfiles]));
        } else {
            self.flush_tag_fixups(t, base)?;
        }

        Ok(())
    }

    fn flush_branch_fixups(&mut self, t: usize, before: Option<i64>) -> Result<(), Fatal> {
        let range = fixup::pending(&self.db.tags[t], before);
        if range.is_empty() {
            return Ok(());
        }
        let base = self.db.tags[t].branch_versions.clone();
        self.emit_fixup_commit(t, range, base)
    }

    fn flush_tag_fixups(
        &mut self,
        t: usize,
        base: Option<Vec<Option<usize>>>,
    ) -> Result<(), Fatal> {
        let range = fixup::pending(&self.db.tags[t], None);
        if range.is_empty() {
            return Ok(());
        }
        self.emit_fixup_commit(t, range, base)
    }

    fn emit_fixup_commit(
        &mut self,
        t: usize,
        range: std::ops::Range<usize>,
        base: Option<Vec<Option<usize>>>,
    ) -> Result<(), Fatal> {
        let batch: Vec<FixupVer> = self.db.tags[t].fixups[range.clone()].to_vec();

        let mut fetch = Vec::new();
        for fv in &batch {
            if let Some(v) = fv.version {
                if self.db.versions[v].mark.is_none() {
                    fetch.push(v);
                }
            }
        }
        self.fetcher.fetch(self.db, self.out, &fetch)?;

        let tag_cs = self.db.tags[t].changeset;
        let time = if self.db.tags[t].is_branch {
            match self.db.tags[t].last {
                Some(last) => self.db.changesets[last].time,
                None => self.db.changesets[tag_cs].time,
            }
        } else {
            self.db.changesets[tag_cs].time
        };

        let comment = fixup::commit_comment(self.db, base.as_deref(), &batch);
        let refname = self.db.ref_name(t);
        let mark = self.out.begin_commit(&refname, "crap", time, &comment)?;
        self.db.tags[t].fixup = true;
        self.db.changesets[tag_cs].mark = Some(mark);

        for fv in &batch {
            let bv = self.db.version_live(base.as_ref().and_then(|b| b[fv.file]));
            let path = &self.db.files[fv.file].path;
            match (fv.version, bv) {
                (tv, bv) if tv == bv => {}
                (Some(tv), _) => {
                    let blob = self.db.versions[tv].mark.ok_or_else(|| {
                        Fatal::UnknownEntity(format!(
                            "no content for {} {}",
                            path, self.db.versions[tv].rev,
                        ))
                    })?;
                    self.out.modify(self.db.versions[tv].exec, blob, path)?;
                }
                (None, Some(_)) => self.out.delete(path)?,
                (None, None) => {}
            }
            if self.db.tags[t].is_branch {
                self.db.tags[t].branch_versions.as_mut().unwrap()[fv.file] = fv.version;
            }
        }

        self.db.tags[t].fixups_applied = range.end;
        Ok(())
    }
}

pub(crate) fn format_date(time: i64) -> String {
    match chrono::DateTime::from_timestamp(time, 0) {
        Some(date) => date.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => format!("@{time}"),
    }
}
