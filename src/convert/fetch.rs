//! Retrieval of file contents from the server. Remote round-trips are
//! expensive, so sets of versions are fetched with the cheapest request
//! shape that covers them, falling back to one request per version.

use super::database::Database;
use crate::cvs::connection::Connection;
use crate::errors::Fatal;
use crate::output::FastImport;
use crate::revnum::RevNum;

/// Maximum spread of timestamps that one `-D` checkout can cover.
const DATE_WINDOW: i64 = 300;

/// Source of blob content for the emitter. The production implementation
/// talks to the CVS server; tests substitute canned content.
pub(crate) trait BlobSource {
    /// Fetches the given versions, writing one blob record each and
    /// assigning their marks. Every requested version must be live,
    /// normalised and unmarked.
    fn fetch(
        &mut self,
        db: &mut Database,
        out: &mut FastImport<'_>,
        versions: &[usize],
    ) -> Result<(), Fatal>;
}

/// Request shape for a multi-version fetch.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Plan {
    /// All versions share one revision string: `update -kk -r<rev>`.
    SameRevision,
    /// One branch, narrow time spread: `update -kk [-r<branch>] -D<date>`.
    DateWindow { branch: Option<String>, at: i64 },
    /// Nothing better than one request per version.
    PerVersion,
}

pub(crate) fn plan(db: &Database, versions: &[usize]) -> Plan {
    let first = &db.versions[versions[0]];

    if versions[1..]
        .iter()
        .all(|&v| db.versions[v].rev == first.rev)
    {
        return Plan::SameRevision;
    }

    let mut dmin = first.time;
    let mut dmax = first.time;
    for &v in &versions[1..] {
        dmin = dmin.min(db.versions[v].time);
        dmax = dmax.max(db.versions[v].time);
    }
    let same_branch = versions[1..]
        .iter()
        .all(|&v| db.versions[v].branch == first.branch);

    if dmax - dmin < DATE_WINDOW && same_branch {
        let name = &db.tags[first.branch].name;
        return Plan::DateWindow {
            branch: (!name.is_empty()).then(|| name.clone()),
            at: dmax,
        };
    }

    Plan::PerVersion
}

pub(crate) struct CvsFetcher<'a> {
    pub(crate) conn: &'a mut Connection,
}

impl BlobSource for CvsFetcher<'_> {
    fn fetch(
        &mut self,
        db: &mut Database,
        out: &mut FastImport<'_>,
        versions: &[usize],
    ) -> Result<(), Fatal> {
        match versions {
            [] => return Ok(()),
            [single] => return self.fetch_single(db, out, *single),
            _ => {}
        }

        match plan(db, versions) {
            Plan::SameRevision => {
                let rev = db.versions[versions[0]].rev.to_string();
                self.request(db, out, Some(&rev), None, versions)?;
            }
            Plan::DateWindow { branch, at } => {
                let date = format_update_date(at)?;
                self.request(db, out, branch.as_deref(), Some(&date), versions)?;
            }
            Plan::PerVersion => {}
        }

        // Whatever the batch missed is fetched one by one.
        for &v in versions {
            if db.versions[v].mark.is_none() {
                self.fetch_single(db, out, v)?;
            }
        }
        Ok(())
    }
}

impl CvsFetcher<'_> {
    fn fetch_single(
        &mut self,
        db: &mut Database,
        out: &mut FastImport<'_>,
        version: usize,
    ) -> Result<(), Fatal> {
        let rev = db.versions[version].rev.to_string();
        self.request(db, out, Some(&rev), None, &[version])?;
        if db.versions[version].mark.is_none() {
            return Err(Fatal::UnknownEntity(format!(
                "cvs checkout failed to get {} {}",
                db.files[db.versions[version].file].path, rev,
            )));
        }
        Ok(())
    }

    fn request(
        &mut self,
        db: &mut Database,
        out: &mut FastImport<'_>,
        r_arg: Option<&str>,
        d_arg: Option<&str>,
        versions: &[usize],
    ) -> Result<(), Fatal> {
        let conn = &mut *self.conn;
        let module = conn.module.clone();
        let prefix = conn.prefix.clone();

        let mut paths: Vec<&str> = versions
            .iter()
            .map(|&v| db.files[db.versions[v].file].path.as_str())
            .collect();
        paths.sort_unstable();
        paths.dedup();

        // Declare each distinct directory, then return to the module
        // root for the update itself.
        let mut last_dir = None;
        for path in &paths {
            if let Some(slash) = path.rfind('/') {
                let dir = &path[..slash];
                if last_dir != Some(dir) {
                    conn.send(&format!(
                        "Directory {module}/{dir}\n{prefix}{dir}\n"
                    ))?;
                    last_dir = Some(dir);
                }
            }
        }
        conn.send(&format!(
            "Directory {module}\n{}\n",
            &prefix[..prefix.len() - 1],
        ))?;

        conn.send("Argument -kk\n")?;
        if let Some(r) = r_arg {
            conn.send(&format!("Argument -r{r}\n"))?;
        }
        if let Some(d) = d_arg {
            conn.send(&format!("Argument -D{d}\n"))?;
        }
        conn.send("Argument --\n")?;
        for path in &paths {
            conn.send(&format!("Argument {path}\n"))?;
        }
        conn.send("update\n")?;
        conn.flush()?;

        read_update_response(conn, db, out)
    }
}

fn read_update_response(
    conn: &mut Connection,
    db: &mut Database,
    out: &mut FastImport<'_>,
) -> Result<(), Fatal> {
    conn.count_transactions += 1;
    loop {
        let line = conn.next_line()?;
        if line == "ok" {
            return Ok(());
        }
        if line == "M" || line.starts_with("M ") || line.starts_with("MT ") {
            continue;
        }
        if let Some(text) = line.strip_prefix("E ") {
            tracing::warn!("server: {text}");
            continue;
        }
        read_update_record(conn, db, out, &line)?;
    }
}

fn read_update_record(
    conn: &mut Connection,
    db: &mut Database,
    out: &mut FastImport<'_>,
    line: &str,
) -> Result<(), Fatal> {
    if line.starts_with("Removed ") {
        // We asked with a silly date; the entry line follows, nothing
        // else to consume.
        conn.next_line()?;
        return Ok(());
    }
    if line.starts_with("Checked-in ") {
        // Entry update without a file change.
        conn.next_line()?;
        conn.next_line()?;
        return Ok(());
    }

    let dir = line
        .strip_prefix("Created ")
        .or_else(|| line.strip_prefix("Update-existing "))
        .or_else(|| line.strip_prefix("Updated "))
        .ok_or_else(|| Fatal::Protocol(format!("did not get update line: '{line}'")))?;
    let dir = match dir {
        "." | "./" => String::new(),
        d => format!("{}/", d.strip_suffix('/').unwrap_or(d)),
    };

    conn.next_line()?; // the repository path, redundant here

    let entry = conn.next_line()?;
    let rest = entry.strip_prefix('/').ok_or_else(|| {
        Fatal::Protocol(format!("doesn't look like an entry line: '{entry}'"))
    })?;
    let (name, rest) = rest.split_once('/').ok_or_else(|| {
        Fatal::Protocol(format!("doesn't look like an entry line: '{entry}'"))
    })?;
    let (rev_str, _) = rest.split_once('/').ok_or_else(|| {
        Fatal::Protocol(format!("doesn't look like an entry line: '{entry}'"))
    })?;

    let path = format!("{dir}{name}");
    let file = db
        .find_file(&path)
        .ok_or_else(|| Fatal::UnknownEntity(format!("cvs checkout sent unknown file {path}")))?;
    let rev = RevNum::parse(rev_str)
        .ok_or_else(|| Fatal::Malformed(format!("bad revision '{rev_str}' for {path}")))?;
    let version = db.find_version(file, &rev).ok_or_else(|| {
        Fatal::UnknownEntity(format!("cvs checkout sent unknown version {path} {rev}"))
    })?;

    let mode = conn.next_line()?;
    if !mode.starts_with("u=") {
        return Err(Fatal::Protocol(format!(
            "unexpected file mode for {path} {rev}: '{mode}'"
        )));
    }
    db.versions[version].exec = mode.contains('x');

    let len_line = conn.next_line()?;
    let len: u64 = len_line.parse().map_err(|_| {
        Fatal::Protocol(format!("unexpected file length for {path} {rev}: '{len_line}'"))
    })?;

    if db.versions[version].mark.is_none() {
        let mark = out.begin_blob(len)?;
        conn.read_block(len, Some(out.raw()))?;
        out.end_blob()?;
        db.versions[version].mark = Some(mark);
    } else {
        tracing::warn!("cvs checkout {path} {rev} - version is duplicate");
        conn.read_block(len, None)?;
    }

    conn.count_versions += 1;
    Ok(())
}

/// `-D` argument format, UTC.
fn format_update_date(time: i64) -> Result<String, Fatal> {
    let date = chrono::DateTime::from_timestamp(time, 0)
        .ok_or_else(|| Fatal::Malformed(format!("timestamp {time} out of range")))?;
    Ok(date.format("%d %b %Y %H:%M:%S -0000").to_string())
}
