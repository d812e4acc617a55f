use std::collections::HashSet;

use super::database::{Changeset, ChangesetKind, Database};
use crate::errors::Fatal;

/// Maximum gap between consecutive same-key file revisions that still
/// counts as one commit, in seconds. CVS stamps each file at the moment
/// it was committed, so one `cvs commit` spreads over a few seconds.
pub(crate) const COALESCE_WINDOW: i64 = 300;

/// Clusters versions into commit changesets and gives every tag/branch a
/// changeset of its own kind.
pub(crate) fn create(db: &mut Database, window: i64) -> Result<(), Fatal> {
    for v in &db.versions {
        if v.time == i64::MIN || v.time == i64::MAX {
            return Err(Fatal::Malformed(format!(
                "revision {} of {} has an out-of-range timestamp",
                v.rev, db.files[v.file].path,
            )));
        }
    }

    let mut ids: Vec<usize> = (0..db.versions.len()).collect();
    ids.sort_by(|&a, &b| {
        let va = &db.versions[a];
        let vb = &db.versions[b];
        va.branch
            .cmp(&vb.branch)
            .then_with(|| va.author.cmp(&vb.author))
            .then_with(|| va.log.cmp(&vb.log))
            .then_with(|| va.time.cmp(&vb.time))
            .then_with(|| a.cmp(&b))
    });

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut cur: Vec<usize> = Vec::new();
    let mut cur_files = HashSet::new();
    for &v in &ids {
        let ver = &db.versions[v];
        let split = match cur.last() {
            None => false,
            Some(&prev) => {
                let pv = &db.versions[prev];
                pv.branch != ver.branch
                    || pv.author != ver.author
                    || pv.log != ver.log
                    || ver.time - pv.time > window
                    || cur_files.contains(&ver.file)
            }
        };
        if split {
            clusters.push(std::mem::take(&mut cur));
            cur_files.clear();
        }
        cur_files.insert(ver.file);
        cur.push(v);
    }
    if !cur.is_empty() {
        clusters.push(cur);
    }

    for members in clusters {
        let cs = db.changesets.len();
        let time = members.iter().map(|&v| db.versions[v].time).max().unwrap();
        for &v in &members {
            db.versions[v].changeset = Some(cs);
        }
        let mut changeset = Changeset::new(ChangesetKind::Commit, time);
        changeset.versions = members;
        db.changesets.push(changeset);
    }

    // Tags and branches borrow their identity from the Tag entity; the
    // analyzer stamps their timestamps once parents are known.
    for t in 0..db.tags.len() {
        let kind = if db.tags[t].is_branch {
            ChangesetKind::Branch(t)
        } else {
            ChangesetKind::Tag(t)
        };
        let cs = db.changesets.len();
        db.changesets.push(Changeset::new(kind, i64::MIN + 1));
        db.tags[t].changeset = cs;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::database::ChangesetKind;
    use super::super::testutil::DbBuilder;
    use super::{create, COALESCE_WINDOW};
    use crate::errors::FatalKind;

    #[test]
    fn test_same_commit_groups() {
        let mut db = DbBuilder::new()
            .version("a", "1.1", 1000, "x", "msg")
            .version("b", "1.1", 1001, "x", "msg")
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();

        let commits: Vec<_> = db
            .changesets
            .iter()
            .filter(|c| c.kind == ChangesetKind::Commit)
            .collect();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].versions.len(), 2);
        assert_eq!(commits[0].time, 1001);
    }

    #[test]
    fn test_key_changes_split() {
        let mut db = DbBuilder::new()
            .version("a", "1.1", 1000, "x", "msg")
            .version("b", "1.1", 1001, "y", "msg")
            .version("c", "1.1", 1002, "x", "other")
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();

        let commits = db
            .changesets
            .iter()
            .filter(|c| c.kind == ChangesetKind::Commit)
            .count();
        assert_eq!(commits, 3);
    }

    #[test]
    fn test_window_splits() {
        let mut db = DbBuilder::new()
            .version("a", "1.1", 1000, "x", "msg")
            .version("b", "1.1", 1400, "x", "msg")
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();

        let commits = db
            .changesets
            .iter()
            .filter(|c| c.kind == ChangesetKind::Commit)
            .count();
        assert_eq!(commits, 2);
    }

    #[test]
    fn test_same_file_splits() {
        // Two rapid-fire revisions of one file with one log message must
        // not collapse into a single commit.
        let mut db = DbBuilder::new()
            .version("a", "1.1", 1000, "x", "msg")
            .version("a", "1.2", 1001, "x", "msg")
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();

        let commits: Vec<_> = db
            .changesets
            .iter()
            .filter(|c| c.kind == ChangesetKind::Commit)
            .collect();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].versions.len(), 1);
        assert_eq!(commits[1].versions.len(), 1);
    }

    #[test]
    fn test_every_tag_gets_a_changeset() {
        let mut db = DbBuilder::new()
            .version("a", "1.1", 1000, "x", "msg")
            .tag("T", &[("a", "1.1")])
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();

        // trunk + T
        assert_eq!(db.tags.len(), 2);
        for t in &db.tags {
            let cs = &db.changesets[t.changeset];
            match cs.kind {
                ChangesetKind::Commit => panic!("tag changeset has commit kind"),
                ChangesetKind::Tag(_) => assert!(!t.is_branch),
                ChangesetKind::Branch(_) => assert!(t.is_branch),
            }
            assert!(cs.versions.is_empty());
        }
    }

    #[test]
    fn test_out_of_range_time_is_fatal() {
        let mut db = DbBuilder::new().version("a", "1.1", i64::MAX, "x", "m").build();
        let err = create(&mut db, COALESCE_WINDOW).unwrap_err();
        assert_eq!(err.kind(), FatalKind::Malformed);
    }
}
