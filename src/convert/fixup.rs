//! Tag and branch fix-ups. A tag (or the start of a branch) may differ
//! from the state of the point it was attached to in the parent branch;
//! those differences become synthetic commits emitted before the tag is
//! considered released.

use std::collections::HashMap;

use super::database::{Database, FixupVer, Tag};

/// Diffs the tag's per-file targets against `base` (the parent branch's
/// live state; `None` means the empty state) and stores the mismatches
/// on the tag, ordered by target time. Absent targets sort first.
pub(crate) fn create_fixups(db: &mut Database, base: Option<&[Option<usize>]>, tag: usize) {
    debug_assert!(db.tags[tag].fixups.is_empty());

    let mut fixups = Vec::new();
    let tag_files = std::mem::take(&mut db.tags[tag].tag_files);
    let mut tf = tag_files.iter().peekable();

    for f in 0..db.files.len() {
        let bv = base
            .and_then(|b| b[f])
            .map(|v| db.version_normalise(v));
        let mut tv = None;
        while tf.peek().is_some_and(|&&v| db.versions[v].file == f) {
            tv = Some(db.version_normalise(*tf.next().unwrap()));
        }

        let bvl = db.version_live(bv);
        let tvl = db.version_live(tv);
        if bvl == tvl {
            continue;
        }

        let time = match tv {
            Some(v) => db.versions[v].time,
            None => i64::MIN,
        };
        fixups.push(FixupVer {
            file: f,
            version: tvl,
            time,
        });
    }

    fixups.sort_by_key(|fv| fv.time);

    let t = &mut db.tags[tag];
    t.tag_files = tag_files;
    t.fixups = fixups;
    t.fixups_applied = 0;
}

/// The not-yet-flushed fixups due at or before `before`; all of them
/// when `before` is `None`.
pub(crate) fn pending(tag: &Tag, before: Option<i64>) -> std::ops::Range<usize> {
    let start = tag.fixups_applied;
    let end = match before {
        None => tag.fixups.len(),
        Some(cutoff) => {
            let mut end = start;
            while end < tag.fixups.len() && tag.fixups[end].time <= cutoff {
                end += 1;
            }
            end
        }
    };
    start..end
}

/// The synthetic commit's log message: a one-line summary followed by
/// per-file lines. To keep the message bounded, only the rarer of the
/// kept and deleted sides is listed in full.
pub(crate) fn commit_comment(
    db: &Database,
    base: Option<&[Option<usize>]>,
    fixups: &[FixupVer],
) -> String {
    let by_file: HashMap<usize, Option<usize>> =
        fixups.iter().map(|fv| (fv.file, fv.version)).collect();

    let mut keep = 0usize;
    let mut added = 0usize;
    let mut deleted = 0usize;
    let mut modified = 0usize;

    for f in 0..db.files.len() {
        let bv = db.version_live(base.and_then(|b| b[f]));
        let tv = by_file.get(&f).copied().unwrap_or(bv);
        if bv == tv {
            if bv.is_some() {
                keep += 1;
            }
        } else if tv.is_none() {
            deleted += 1;
        } else if bv.is_none() {
            added += 1;
        } else {
            modified += 1;
        }
    }

    let mut comment = format!(
        "Fix-up commit generated by crap-clone.  (~{modified} +{added} -{deleted} ={keep})"
    );

    for f in 0..db.files.len() {
        let bv = db.version_live(base.and_then(|b| b[f]));
        let tv = by_file.get(&f).copied().unwrap_or(bv);
        if bv == tv {
            if bv.is_some() && keep <= deleted {
                comment.push_str(&format!(
                    "\n{} KEEP {}",
                    db.files[f].path,
                    db.versions[bv.unwrap()].rev,
                ));
            }
            continue;
        }
        if tv.is_some() || deleted <= keep {
            let from = match bv {
                Some(v) => db.versions[v].rev.to_string(),
                None => "ADD".to_owned(),
            };
            let to = match tv {
                Some(v) => db.versions[v].rev.to_string(),
                None => "DELETE".to_owned(),
            };
            comment.push_str(&format!("\n{} {}->{}", db.files[f].path, from, to));
        }
    }

    comment
}

#[cfg(test)]
mod test {
    use super::super::changeset::{create, COALESCE_WINDOW};
    use super::super::database::Database;
    use super::super::testutil::DbBuilder;
    use super::{commit_comment, create_fixups, pending};

    fn db_two_files() -> Database {
        let mut db = DbBuilder::new()
            .version("a", "1.1", 100, "x", "one")
            .version("a", "1.2", 300, "x", "three")
            .version("b", "1.1", 200, "x", "two")
            .tag("T", &[("a", "1.1")])
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();
        db
    }

    fn ver(db: &Database, path: &str, rev: &str) -> usize {
        let f = db.find_file(path).unwrap();
        db.find_version(f, &crate::revnum::RevNum::parse(rev).unwrap())
            .unwrap()
    }

    #[test]
    fn test_diff_and_order() {
        let mut db = db_two_files();
        let t = db.tags.iter().position(|t| t.name == "T").unwrap();

        // Base state: a@1.2 and b@1.1 live; the tag wants only a@1.1.
        let a = db.find_file("a").unwrap();
        let b = db.find_file("b").unwrap();
        let mut base = vec![None; db.files.len()];
        base[a] = Some(ver(&db, "a", "1.2"));
        base[b] = Some(ver(&db, "b", "1.1"));

        create_fixups(&mut db, Some(&base), t);
        let fixups = &db.tags[t].fixups;
        assert_eq!(fixups.len(), 2);
        // The deletion of b has no target and sorts first.
        assert_eq!(fixups[0].file, b);
        assert_eq!(fixups[0].version, None);
        assert_eq!(fixups[0].time, i64::MIN);
        assert_eq!(fixups[1].file, a);
        assert_eq!(fixups[1].version, Some(ver(&db, "a", "1.1")));
        assert_eq!(fixups[1].time, 100);
    }

    #[test]
    fn test_exact_state_yields_none() {
        let mut db = db_two_files();
        let t = db.tags.iter().position(|t| t.name == "T").unwrap();

        let a = db.find_file("a").unwrap();
        let mut base = vec![None; db.files.len()];
        base[a] = Some(ver(&db, "a", "1.1"));

        create_fixups(&mut db, Some(&base), t);
        assert!(db.tags[t].fixups.is_empty());
    }

    #[test]
    fn test_pending_cursor() {
        let mut db = db_two_files();
        let t = db.tags.iter().position(|t| t.name == "T").unwrap();
        let b = db.find_file("b").unwrap();
        let mut base = vec![None; db.files.len()];
        base[db.find_file("a").unwrap()] = Some(ver(&db, "a", "1.2"));
        base[b] = Some(ver(&db, "b", "1.1"));
        create_fixups(&mut db, Some(&base), t);

        // Nothing due before the a@1.1 target except the deletion.
        assert_eq!(pending(&db.tags[t], Some(50)), 0..1);
        assert_eq!(pending(&db.tags[t], Some(100)), 0..2);
        db.tags[t].fixups_applied = 1;
        assert_eq!(pending(&db.tags[t], None), 1..2);
    }

    #[test]
    fn test_comment_lists_rarer_side() {
        let mut db = DbBuilder::new()
            .version("a", "1.1", 100, "x", "m")
            .version("b", "1.1", 100, "x", "m")
            .version("c", "1.1", 100, "x", "m")
            .version("d", "1.1", 150, "x", "m2")
            .tag("T", &[("a", "1.1"), ("b", "1.1"), ("c", "1.1")])
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();
        let t = db.tags.iter().position(|t| t.name == "T").unwrap();

        // All four files live; the tag drops only d.
        let mut base = vec![None; db.files.len()];
        for (i, path) in ["a", "b", "c", "d"].iter().enumerate() {
            base[i] = Some(ver(&db, path, "1.1"));
        }
        create_fixups(&mut db, Some(&base), t);

        let comment = commit_comment(&db, Some(&base), &db.tags[t].fixups);
        // One deletion against three keeps: the deletion is listed, the
        // keeps are only counted.
        assert!(comment.starts_with("Fix-up commit generated by crap-clone.  (~0 +0 -1 =3)"));
        assert!(comment.contains("d 1.1->DELETE"));
        assert!(!comment.contains("KEEP"));
    }

    #[test]
    fn test_comment_lists_keeps_when_rarer() {
        let mut db = DbBuilder::new()
            .version("a", "1.1", 100, "x", "m")
            .version("b", "1.1", 100, "x", "m")
            .version("c", "1.1", 100, "x", "m")
            .tag("T", &[("a", "1.1")])
            .build();
        create(&mut db, COALESCE_WINDOW).unwrap();
        let t = db.tags.iter().position(|t| t.name == "T").unwrap();

        let mut base = vec![None; db.files.len()];
        for (i, path) in ["a", "b", "c"].iter().enumerate() {
            base[i] = Some(ver(&db, path, "1.1"));
        }
        create_fixups(&mut db, Some(&base), t);

        let comment = commit_comment(&db, Some(&base), &db.tags[t].fixups);
        assert!(comment.starts_with("Fix-up commit generated by crap-clone.  (~0 +0 -2 =1)"));
        // The single keep is the rarer side; the deletions are only
        // counted, not listed.
        assert!(comment.contains("a KEEP 1.1"));
        assert!(!comment.contains("DELETE"));
    }

    #[test]
    fn test_comment_modify_and_add() {
        let mut db = db_two_files();
        let t = db.tags.iter().position(|t| t.name == "T").unwrap();
        let a = db.find_file("a").unwrap();

        // Base has a@1.2 only; the tag wants a@1.1 (modify). Against an
        // empty base, a@1.1 is an addition.
        let mut base = vec![None; db.files.len()];
        base[a] = Some(ver(&db, "a", "1.2"));
        create_fixups(&mut db, Some(&base), t);
        let comment = commit_comment(&db, Some(&base), &db.tags[t].fixups);
        assert!(comment.starts_with("Fix-up commit generated by crap-clone.  (~1 +0 -0 =0)"));
        assert!(comment.contains("a 1.2->1.1"));

        let mut db = db_two_files();
        let t = db.tags.iter().position(|t| t.name == "T").unwrap();
        create_fixups(&mut db, None, t);
        let comment = commit_comment(&db, None, &db.tags[t].fixups);
        assert!(comment.starts_with("Fix-up commit generated by crap-clone.  (~0 +1 -0 =0)"));
        assert!(comment.contains("a ADD->1.1"));
    }
}
