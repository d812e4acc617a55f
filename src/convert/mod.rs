use std::io::Write;

use crate::cvs::connection::Connection;
use crate::cvs::rlog;
use crate::errors::Fatal;
use crate::output::FastImport;

mod analyze;
mod changeset;
mod database;
mod emit;
mod fetch;
mod fixup;
mod import;
#[cfg(test)]
mod testutil;

pub(crate) use emit::Summary;

/// Runs the whole conversion: pull the logs, reconstruct the history,
/// emit the fast-import stream.
pub(crate) fn convert(
    conn: &mut Connection,
    out: &mut dyn Write,
    progress: &mut dyn Write,
) -> Result<Summary, Fatal> {
    tracing::info!("requesting rlog for module {}", conn.module);
    let rlog_files = rlog::fetch_files(conn)?;
    tracing::info!("parsed logs for {} files", rlog_files.len());

    let mut db = import::build(rlog_files)?;
    changeset::create(&mut db, changeset::COALESCE_WINDOW)?;
    analyze::branch_analyse(&mut db);
    tracing::info!(
        "{} files, {} versions, {} tags, {} changesets",
        db.files.len(),
        db.versions.len(),
        db.tags.len(),
        db.changesets.len(),
    );

    let mut fast_import = FastImport::new(out);
    let mut fetcher = fetch::CvsFetcher { conn };
    let summary = emit::run(&mut db, &mut fetcher, &mut fast_import, progress)?;
    fast_import.progress_done()?;
    Ok(summary)
}
