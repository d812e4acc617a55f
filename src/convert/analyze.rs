use std::collections::BTreeSet;

use super::database::{ChangesetKind, Database};

/// Assigns every tag and branch a parent changeset, wires the emission
/// DAG, stamps tag changeset timestamps and allocates the per-branch
/// version arrays.
pub(crate) fn branch_analyse(db: &mut Database) {
    assign_parents(db);
    break_parent_cycles(db);
    stamp_tag_changesets(db);
    wire_dag(db);
    init_branch_versions(db);
}

/// The owning tag of a changeset: a commit belongs to its branch, a
/// tag/branch changeset to its tag.
fn owner_tag(db: &Database, cs: usize) -> usize {
    match db.changesets[cs].kind {
        ChangesetKind::Commit => db.versions[db.changesets[cs].versions[0]].branch,
        ChangesetKind::Tag(t) | ChangesetKind::Branch(t) => t,
    }
}

/// Two branches with look-alike histories can end up parented on each
/// other, which would deadlock the scheduler. Walk every branch's
/// parent chain and detach the edge that closes a loop.
fn break_parent_cycles(db: &mut Database) {
    for t in 0..db.tags.len() {
        if !db.tags[t].is_branch {
            continue;
        }
        let mut seen = vec![t];
        let mut cur = t;
        while let Some(p) = db.tags[cur].parent {
            let pb = owner_tag(db, p);
            if seen.contains(&pb) {
                tracing::warn!(
                    "branch {} closes a parent cycle; detaching it",
                    db.tags[cur].name,
                );
                db.tags[cur].parent = None;
                break;
            }
            seen.push(pb);
            cur = pb;
        }
    }
}

struct Best {
    mismatches: usize,
    parent: Option<usize>,
    time: i64,
}

/// For every branch, replay its commits in time order from the branch's
/// own starting snapshot, scoring each position against every tag: the
/// number of files whose live state differs from the tag's target. The
/// best parent minimizes mismatches; ties go to the latest position.
///
/// The scoring is incremental. With `L` the number of live files in the
/// replayed state, `LT[t]` the number of tag `t`'s targeted files
/// currently live, and `M[t]` the mismatches among targeted files, the
/// total mismatch count for `t` is `M[t] + L - LT[t]`: untargeted live
/// files each count as one mismatch.
fn assign_parents(db: &mut Database) {
    let nfiles = db.files.len();
    let ntags = db.tags.len();

    let mut file_targets: Vec<Vec<(usize, usize)>> = vec![Vec::new(); nfiles];
    for t in 1..ntags {
        for &v in &db.tags[t].tag_files {
            file_targets[db.versions[v].file].push((t, v));
        }
    }

    // The all-absent state is the fallback candidate: a tag that never
    // does better keeps no parent and reconciles from nothing.
    let mut best: Vec<Best> = (0..ntags)
        .map(|t| Best {
            mismatches: db.tags[t]
                .tag_files
                .iter()
                .filter(|&&v| db.version_live(Some(v)).is_some())
                .count(),
            parent: None,
            time: i64::MIN,
        })
        .collect();

    let mut commits_by_branch: Vec<Vec<usize>> = vec![Vec::new(); ntags];
    for (cs, changeset) in db.changesets.iter().enumerate() {
        if changeset.kind == ChangesetKind::Commit {
            commits_by_branch[db.versions[changeset.versions[0]].branch].push(cs);
        }
    }

    for b in 0..ntags {
        if !db.tags[b].is_branch {
            continue;
        }
        let mut commits = commits_by_branch[b].clone();
        commits.sort_by_key(|&cs| (db.changesets[cs].time, cs));

        let mut state: Vec<Option<usize>> = vec![None; nfiles];
        for &v in &db.tags[b].tag_files {
            state[db.versions[v].file] = Some(v);
        }

        let mut l = 0usize;
        let mut lt = vec![0usize; ntags];
        let mut m = vec![0usize; ntags];
        for f in 0..nfiles {
            let s = db.version_live(state[f]);
            if s.is_some() {
                l += 1;
            }
            for &(t, tv) in &file_targets[f] {
                if s.is_some() {
                    lt[t] += 1;
                }
                if s != db.version_live(Some(tv)) {
                    m[t] += 1;
                }
            }
        }

        let creation_time = branch_creation_time(db, b);
        consider(db, &mut best, &m, &lt, l, b, db.tags[b].changeset, creation_time);

        for &cs in &commits {
            for i in 0..db.changesets[cs].versions.len() {
                let v = db.changesets[cs].versions[i];
                let f = db.versions[v].file;
                let old_live = db.version_live(state[f]);
                let new_live = db.version_live(Some(v));
                if old_live != new_live {
                    match (old_live.is_some(), new_live.is_some()) {
                        (false, true) => l += 1,
                        (true, false) => l -= 1,
                        _ => {}
                    }
                    for &(t, tv) in &file_targets[f] {
                        let target = db.version_live(Some(tv));
                        match (old_live.is_some(), new_live.is_some()) {
                            (false, true) => lt[t] += 1,
                            (true, false) => lt[t] -= 1,
                            _ => {}
                        }
                        match (old_live != target, new_live != target) {
                            (false, true) => m[t] += 1,
                            (true, false) => m[t] -= 1,
                            _ => {}
                        }
                    }
                }
                state[f] = Some(v);
            }
            consider(db, &mut best, &m, &lt, l, b, cs, db.changesets[cs].time);
        }
    }

    for t in 1..ntags {
        db.tags[t].parent = best[t].parent;
    }
}

fn consider(
    db: &Database,
    best: &mut [Best],
    m: &[usize],
    lt: &[usize],
    l: usize,
    scanned_branch: usize,
    candidate: usize,
    time: i64,
) {
    for t in 1..db.tags.len() {
        // A branch cannot descend from its own history.
        if t == scanned_branch {
            continue;
        }
        let mismatches = m[t] + l - lt[t];
        if mismatches < best[t].mismatches
            || (mismatches == best[t].mismatches && time >= best[t].time)
        {
            best[t] = Best {
                mismatches,
                parent: Some(candidate),
                time,
            };
        }
    }
}

fn branch_creation_time(db: &Database, tag: usize) -> i64 {
    db.tags[tag]
        .tag_files
        .iter()
        .map(|&v| db.versions[v].time)
        .max()
        .unwrap_or(i64::MIN + 1)
}

/// A tag's changeset sorts at the newest of its per-file targets so the
/// scheduler slots it right after its parent; tags win timestamp ties
/// against commits.
fn stamp_tag_changesets(db: &mut Database) {
    for t in 0..db.tags.len() {
        let newest_target = db.tags[t]
            .tag_files
            .iter()
            .map(|&v| db.versions[v].time)
            .max();
        let time = match newest_target {
            Some(time) => time,
            None => db.tags[t]
                .parent
                .map(|p| db.changesets[p].time)
                .unwrap_or(i64::MIN + 1),
        };
        db.changesets[db.tags[t].changeset].time = time;
    }
}

/// Parent edges, deduplicated: a commit follows the changeset of each
/// member's parent version and its branch's own changeset; a tag follows
/// its assigned parent.
fn wire_dag(db: &mut Database) {
    for cs in 0..db.changesets.len() {
        if db.changesets[cs].kind != ChangesetKind::Commit {
            continue;
        }
        let mut parents = BTreeSet::new();
        for i in 0..db.changesets[cs].versions.len() {
            let v = db.changesets[cs].versions[i];
            if let Some(p) = db.versions[v].parent {
                parents.insert(db.versions[p].changeset.unwrap());
            }
            parents.insert(db.tags[db.versions[v].branch].changeset);
        }
        parents.remove(&cs);
        for p in parents {
            db.changesets[p].children.push(cs);
            db.changesets[cs].unready_count += 1;
        }
    }

    for t in 0..db.tags.len() {
        if let Some(p) = db.tags[t].parent {
            let cs = db.tags[t].changeset;
            db.changesets[p].children.push(cs);
            db.changesets[cs].unready_count += 1;
        }
    }
}

fn init_branch_versions(db: &mut Database) {
    let nfiles = db.files.len();
    for t in 0..db.tags.len() {
        if !db.tags[t].is_branch {
            continue;
        }
        let mut versions = vec![None; nfiles];
        for &v in &db.tags[t].tag_files {
            versions[db.versions[v].file] = Some(v);
        }
        db.tags[t].branch_versions = Some(versions);
    }
}
