use crate::cvs::connection::Connection;
use crate::errors::Fatal;
use crate::revnum::RevNum;

/// One RCS file as reported by `rlog`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RlogFile {
    /// Path relative to the module root, `,v` suffix and `Attic/`
    /// component stripped.
    pub(crate) path: String,
    pub(crate) symbols: Vec<(String, RevNum)>,
    pub(crate) revisions: Vec<RlogRevision>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RlogRevision {
    pub(crate) rev: RevNum,
    /// Wall-clock seconds since the epoch, UTC.
    pub(crate) time: i64,
    pub(crate) author: String,
    pub(crate) dead: bool,
    pub(crate) log: String,
}

const REV_SEPARATOR: &str = "----------------------------";
const FILE_TERMINATOR: &str =
    "=============================================================================";

/// Issues the `rlog` request for the module and parses the whole
/// response.
pub(crate) fn fetch_files(conn: &mut Connection) -> Result<Vec<RlogFile>, Fatal> {
    conn.send(&format!(
        "Global_option -q\nArgument --\nArgument {}\nrlog\n",
        conn.module,
    ))?;
    conn.flush()?;

    let mut text = Vec::new();
    loop {
        let line = conn.next_line()?;
        if line == "ok" {
            break;
        } else if let Some(t) = line.strip_prefix("M ") {
            text.push(t.to_owned());
        } else if line == "M" {
            text.push(String::new());
        } else if let Some(t) = line.strip_prefix("E ") {
            tracing::warn!("server: {t}");
        } else if line.starts_with("error") {
            return Err(Fatal::Protocol(format!("rlog failed: '{line}'")));
        } else {
            return Err(Fatal::Protocol(format!("unexpected rlog response line: '{line}'")));
        }
    }

    parse(&conn.prefix, text.iter().map(String::as_str))
}

/// Parses rlog text (already stripped of protocol framing) into per-file
/// records. `prefix` is the repository prefix (`<root>/<module>/`) to
/// strip from `RCS file:` lines.
pub(crate) fn parse<'a>(
    prefix: &str,
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<RlogFile>, Fatal> {
    let mut lines = lines.peekable();
    let mut files = Vec::new();

    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }
        let rcs_path = line
            .strip_prefix("RCS file: ")
            .ok_or_else(|| Fatal::Protocol(format!("expected 'RCS file:' line, got '{line}'")))?;
        files.push(parse_file(prefix, rcs_path, &mut lines)?);
    }

    Ok(files)
}

fn parse_file<'a>(
    prefix: &str,
    rcs_path: &str,
    lines: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>,
) -> Result<RlogFile, Fatal> {
    let path = strip_rcs_path(prefix, rcs_path)?;
    let mut symbols = Vec::new();
    let mut revisions = Vec::new();

    // Header section up to the first revision separator or, for files
    // with no selected revisions, the terminator.
    let mut in_symbols = false;
    loop {
        let line = lines
            .next()
            .ok_or_else(|| Fatal::Protocol(format!("rlog for {path} truncated in header")))?;
        if line == REV_SEPARATOR {
            break;
        }
        if line == FILE_TERMINATOR {
            return Ok(RlogFile {
                path,
                symbols,
                revisions,
            });
        }
        if in_symbols {
            if let Some(sym) = line.strip_prefix('\t') {
                let (name, rev) = sym.split_once(": ").ok_or_else(|| {
                    Fatal::Protocol(format!("bad symbolic name line '{line}' for {path}"))
                })?;
                match RevNum::parse(rev) {
                    Some(rev) => symbols.push((name.to_owned(), rev)),
                    None => {
                        return Err(Fatal::Malformed(format!(
                            "bad revision '{rev}' for symbol '{name}' on {path}"
                        )));
                    }
                }
                continue;
            }
            in_symbols = false;
        }
        if line == "symbolic names:" {
            in_symbols = true;
        }
    }

    // Revision blocks.
    loop {
        let line = lines
            .next()
            .ok_or_else(|| Fatal::Protocol(format!("rlog for {path} truncated in revisions")))?;
        let rev_str = line
            .strip_prefix("revision ")
            .ok_or_else(|| Fatal::Protocol(format!("expected revision line, got '{line}'")))?;
        // A lock holder may trail the revision number.
        let rev_str = rev_str.split('\t').next().unwrap().trim_end();
        let rev = RevNum::parse(rev_str)
            .ok_or_else(|| Fatal::Malformed(format!("bad revision '{rev_str}' on {path}")))?;

        let line = lines
            .next()
            .ok_or_else(|| Fatal::Protocol(format!("rlog for {path} truncated after revision")))?;
        let (time, author, dead) = parse_date_line(line)
            .ok_or_else(|| Fatal::Protocol(format!("bad date line '{line}' for {path}")))?;

        if lines
            .peek()
            .is_some_and(|l| l.starts_with("branches:  ") || *l == "branches:")
        {
            lines.next();
        }

        let mut log = String::new();
        let done = loop {
            let line = lines
                .next()
                .ok_or_else(|| Fatal::Protocol(format!("rlog for {path} truncated in log")))?;
            if line == FILE_TERMINATOR {
                break true;
            }
            // The separator is only a boundary when a revision line
            // follows; log text may contain look-alike lines.
            if line == REV_SEPARATOR && lines.peek().is_some_and(|l| l.starts_with("revision ")) {
                break false;
            }
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(line);
        };

        revisions.push(RlogRevision {
            rev,
            time,
            author,
            dead,
            log,
        });
        if done {
            return Ok(RlogFile {
                path,
                symbols,
                revisions,
            });
        }
    }
}

fn strip_rcs_path(prefix: &str, rcs_path: &str) -> Result<String, Fatal> {
    let rel = rcs_path.strip_prefix(prefix).ok_or_else(|| {
        Fatal::Protocol(format!("RCS file '{rcs_path}' outside module prefix '{prefix}'"))
    })?;
    let rel = rel.strip_suffix(",v").unwrap_or(rel);
    // Deleted files live in an Attic subdirectory of their real one.
    let path = match rel.rfind('/') {
        Some(slash) if &rel[..slash] == "Attic" => rel[slash + 1..].to_owned(),
        Some(slash) if rel[..slash].ends_with("/Attic") => {
            format!("{}{}", &rel[..slash - 5], &rel[slash + 1..])
        }
        _ => rel.to_owned(),
    };
    if path.is_empty() {
        return Err(Fatal::Protocol(format!("RCS file '{rcs_path}' has an empty path")));
    }
    Ok(path)
}

/// `date: 2005/03/01 12:00:00;  author: fred;  state: Exp;  lines: +1 -0`
fn parse_date_line(line: &str) -> Option<(i64, String, bool)> {
    let mut time = None;
    let mut author = None;
    let mut state = None;

    for field in line.split(';') {
        let field = field.trim();
        if let Some(v) = field.strip_prefix("date: ") {
            time = Some(parse_date(v)?);
        } else if let Some(v) = field.strip_prefix("author: ") {
            author = Some(v.to_owned());
        } else if let Some(v) = field.strip_prefix("state: ") {
            state = Some(v.to_owned());
        }
    }

    Some((
        time?,
        author?,
        state.as_deref() == Some("dead"),
    ))
}

/// Accepts both the old `YYYY/MM/DD HH:MM:SS` form (implicitly UTC) and
/// the newer `YYYY-MM-DD HH:MM:SS +ZZZZ` one.
fn parse_date(s: &str) -> Option<i64> {
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H:%M:%S") {
        return Some(naive.and_utc().timestamp());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.timestamp());
    }
    None
}
