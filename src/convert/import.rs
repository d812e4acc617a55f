use std::collections::HashMap;

use super::database::{Database, File, Tag, Version, TRUNK};
use crate::cvs::rlog::RlogFile;
use crate::errors::Fatal;
use crate::revnum::RevNum;

/// Turns parsed rlog records into the revision-tree model: files,
/// versions with parent links and branch membership, global tags and
/// branches with their tag-files, and trunk-side shadows for
/// vendor-branch revisions.
pub(crate) fn build(mut rlog_files: Vec<RlogFile>) -> Result<Database, Fatal> {
    rlog_files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut db = Database::new();
    let mut tags_by_name = HashMap::<String, usize>::new();

    let mut prev_path = None::<String>;
    for rf in rlog_files {
        if prev_path.as_deref() == Some(rf.path.as_str()) {
            tracing::warn!("duplicate RCS file for path {}, ignoring", rf.path);
            continue;
        }
        prev_path = Some(rf.path.clone());
        add_file(&mut db, &mut tags_by_name, rf)?;
    }

    Ok(db)
}

fn tag_index(
    db: &mut Database,
    tags_by_name: &mut HashMap<String, usize>,
    name: &str,
    is_branch: bool,
) -> usize {
    if let Some(&t) = tags_by_name.get(name) {
        if is_branch && !db.tags[t].is_branch {
            tracing::warn!("symbol {name} is both a tag and a branch; treating it as a branch");
            db.tags[t].is_branch = true;
        }
        return t;
    }
    let t = db.tags.len();
    db.tags.push(Tag::new(name.to_owned(), is_branch));
    tags_by_name.insert(name.to_owned(), t);
    t
}

fn add_file(
    db: &mut Database,
    tags_by_name: &mut HashMap<String, usize>,
    rf: RlogFile,
) -> Result<(), Fatal> {
    let file = db.files.len();
    db.files.push(File {
        path: rf.path.clone(),
        versions: Vec::new(),
    });

    // Split the symbols into branches (keyed by their branch prefix) and
    // plain tags (resolved against revisions below).
    let mut branch_by_prefix = HashMap::<RevNum, usize>::new();
    let mut branch_points = Vec::<(usize, RevNum)>::new();
    let mut plain_tags = Vec::<(usize, RevNum)>::new();

    for (name, sym_rev) in rf.symbols {
        if sym_rev.is_branch_symbol() {
            let prefix = sym_rev.symbol_branch_prefix().unwrap();
            let t = tag_index(db, tags_by_name, &name, true);
            if let Some(point) = prefix.branch_point() {
                branch_points.push((t, point));
            }
            branch_by_prefix.entry(prefix).or_insert(t);
        } else {
            let t = tag_index(db, tags_by_name, &name, false);
            plain_tags.push((t, sym_rev));
        }
    }

    // Create the versions.
    let mut by_rev = HashMap::<RevNum, usize>::new();
    for r in rf.revisions {
        if by_rev.contains_key(&r.rev) {
            tracing::warn!("{}: duplicate revision {}, ignoring", rf.path, r.rev);
            continue;
        }
        let branch = if r.rev.is_trunk() {
            TRUNK
        } else {
            let Some(prefix) = r.rev.branch_prefix() else {
                tracing::warn!("{}: revision {} is not on any branch, skipping", rf.path, r.rev);
                continue;
            };
            match branch_by_prefix.get(&prefix) {
                Some(&t) => t,
                None => {
                    tracing::warn!(
                        "{}: revision {} is on an unnamed branch, skipping",
                        rf.path,
                        r.rev,
                    );
                    continue;
                }
            }
        };

        let v = db.versions.len();
        db.versions.push(Version {
            file,
            rev: r.rev.clone(),
            time: r.time,
            author: r.author,
            log: r.log,
            dead: r.dead,
            exec: false,
            parent: None,
            branch,
            implicit_merge: None,
            mark: None,
            changeset: None,
        });
        db.files[file].versions.push(v);
        by_rev.insert(r.rev, v);
    }

    // Parent links within the revision tree.
    for (rev, &v) in by_rev.iter() {
        if let Some(parent_rev) = rev.parent() {
            db.versions[v].parent = by_rev.get(&parent_rev).copied();
        }
    }

    // Tag-files: explicit entries for plain tags, the branch point for
    // branches.
    for (t, rev) in plain_tags {
        match by_rev.get(&rev) {
            Some(&v) => db.tags[t].tag_files.push(v),
            None => tracing::warn!(
                "{}: tag {} names unknown revision {}, skipping",
                rf.path,
                db.tags[t].name,
                rev,
            ),
        }
    }
    for (t, point) in branch_points {
        match by_rev.get(&point) {
            Some(&v) => db.tags[t].tag_files.push(v),
            None => tracing::warn!(
                "{}: branch {} sprouts from unknown revision {}, skipping",
                rf.path,
                db.tags[t].name,
                point,
            ),
        }
    }

    add_vendor_shadows(db, file, &branch_by_prefix, &by_rev);

    Ok(())
}

/// A revision imported on the vendor branch is the live trunk state
/// until the first real trunk commit (`1.2`) postdates it. Such
/// revisions get a trunk-side shadow version whose `implicit_merge`
/// resolves back to the vendor revision, and `1.2` (if any) is
/// re-parented onto the newest shadow.
fn add_vendor_shadows(
    db: &mut Database,
    file: usize,
    branch_by_prefix: &HashMap<RevNum, usize>,
    by_rev: &HashMap<RevNum, usize>,
) {
    let Some((_, &vendor_tag)) = branch_by_prefix
        .iter()
        .find(|(prefix, _)| prefix.is_vendor_branch())
    else {
        return;
    };

    let mut vendor_versions: Vec<usize> = db.files[file]
        .versions
        .iter()
        .copied()
        .filter(|&v| db.versions[v].branch == vendor_tag)
        .collect();
    vendor_versions.sort_by(|&a, &b| db.versions[a].rev.cmp(&db.versions[b].rev));

    let first_trunk_commit = by_rev.get(&RevNum::parse("1.2").unwrap()).copied();
    let trunk_cutoff = first_trunk_commit.map(|v| db.versions[v].time);

    let mut prev = by_rev.get(&RevNum::parse("1.1").unwrap()).copied();
    for v in vendor_versions {
        if trunk_cutoff.is_some_and(|cutoff| db.versions[v].time >= cutoff) {
            break;
        }
        let shadow = db.versions.len();
        let src = &db.versions[v];
        let (src_rev, src_time, src_author, src_log, src_dead) = (
            src.rev.clone(),
            src.time,
            src.author.clone(),
            src.log.clone(),
            src.dead,
        );
        db.versions.push(Version {
            file,
            rev: src_rev,
            time: src_time,
            author: src_author,
            log: src_log,
            dead: src_dead,
            exec: false,
            parent: prev,
            branch: TRUNK,
            implicit_merge: Some(v),
            mark: None,
            changeset: None,
        });
        db.files[file].versions.push(shadow);
        prev = Some(shadow);
    }

    if let Some(trunk_commit) = first_trunk_commit {
        if prev != by_rev.get(&RevNum::parse("1.1").unwrap()).copied() {
            db.versions[trunk_commit].parent = prev;
        }
    }
}

#[cfg(test)]
mod test {
    use super::build;
    use crate::cvs::rlog::{RlogFile, RlogRevision};
    use crate::revnum::RevNum;

    fn rev(s: &str) -> RevNum {
        RevNum::parse(s).unwrap()
    }

    fn revision(r: &str, time: i64, author: &str, dead: bool, log: &str) -> RlogRevision {
        RlogRevision {
            rev: rev(r),
            time,
            author: author.to_owned(),
            dead,
            log: log.to_owned(),
        }
    }

    #[test]
    fn test_trunk_and_branch() {
        let db = build(vec![RlogFile {
            path: "a".to_owned(),
            symbols: vec![
                ("REL".to_owned(), rev("1.2")),
                ("BR".to_owned(), rev("1.2.0.2")),
            ],
            revisions: vec![
                revision("1.2.2.1", 400, "x", false, "on branch"),
                revision("1.2", 200, "x", false, "second"),
                revision("1.1", 100, "x", false, "first"),
            ],
        }])
        .unwrap();

        assert_eq!(db.files.len(), 1);
        assert_eq!(db.versions.len(), 3);
        // trunk + REL + BR
        assert_eq!(db.tags.len(), 3);

        let v12 = db.find_version(0, &rev("1.2")).unwrap();
        let v11 = db.find_version(0, &rev("1.1")).unwrap();
        let v1221 = db.find_version(0, &rev("1.2.2.1")).unwrap();

        assert_eq!(db.versions[v12].parent, Some(v11));
        assert_eq!(db.versions[v1221].parent, Some(v12));
        assert_eq!(db.versions[v11].branch, 0);

        let rel = db.tags.iter().position(|t| t.name == "REL").unwrap();
        let br = db.tags.iter().position(|t| t.name == "BR").unwrap();
        assert!(!db.tags[rel].is_branch);
        assert!(db.tags[br].is_branch);
        assert_eq!(db.tags[rel].tag_files, vec![v12]);
        // The branch's tag-file is its branch point.
        assert_eq!(db.tags[br].tag_files, vec![v12]);
        assert_eq!(db.versions[v1221].branch, br);
    }

    #[test]
    fn test_vendor_shadows() {
        let db = build(vec![RlogFile {
            path: "a".to_owned(),
            symbols: vec![("VENDOR".to_owned(), rev("1.1.1"))],
            revisions: vec![
                revision("1.2", 500, "x", false, "local change"),
                revision("1.1", 100, "x", false, "initial"),
                revision("1.1.1.1", 100, "x", false, "import"),
                revision("1.1.1.2", 300, "x", false, "import again"),
                revision("1.1.1.3", 900, "x", false, "too late"),
            ],
        }])
        .unwrap();

        // 5 real versions plus shadows for 1.1.1.1 and 1.1.1.2; 1.1.1.3
        // postdates 1.2 and stays vendor-only.
        assert_eq!(db.versions.len(), 7);

        let v11 = db.find_version(0, &rev("1.1")).unwrap();
        let v12 = db.find_version(0, &rev("1.2")).unwrap();
        let real1 = db.find_version(0, &rev("1.1.1.1")).unwrap();

        let shadows: Vec<usize> = (0..db.versions.len())
            .filter(|&v| db.versions[v].implicit_merge.is_some())
            .collect();
        assert_eq!(shadows.len(), 2);
        let s1 = shadows[0];
        let s2 = shadows[1];

        assert_eq!(db.versions[s1].branch, 0);
        assert_eq!(db.versions[s1].parent, Some(v11));
        assert_eq!(db.versions[s2].parent, Some(s1));
        assert_eq!(db.versions[v12].parent, Some(s2));

        // find_version returns the real vendor revision, and normalise
        // resolves the shadow onto it.
        assert_eq!(db.version_normalise(s1), real1);
        assert_eq!(db.find_version(0, &rev("1.1.1.1")), Some(real1));
    }

    #[test]
    fn test_unnamed_branch_dropped() {
        let db = build(vec![RlogFile {
            path: "a".to_owned(),
            symbols: vec![],
            revisions: vec![
                revision("1.1", 100, "x", false, "first"),
                revision("1.1.2.1", 200, "x", false, "mystery branch"),
            ],
        }])
        .unwrap();
        assert_eq!(db.versions.len(), 1);
    }
}
