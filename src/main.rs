#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]

use std::io::Write as _;
use std::process::ExitCode;

mod cli;
mod convert;
mod cvs;
mod errors;
mod output;
mod revnum;

enum RunError {
    Generic,
    Usage,
}

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Generic) => ExitCode::from(1),
        Err(RunError::Usage) => ExitCode::from(2),
    }
}

fn main_inner() -> Result<(), RunError> {
    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            eprintln!("{e}");
            return Err(RunError::Usage);
        }
        Err(e) => {
            // --help prints to stdout and exits 0.
            print!("{e}");
            return Ok(());
        }
    };

    init_logger();

    let mut conn = cvs::connection::Connection::connect(&args.root, &args.module).map_err(|e| {
        tracing::error!("{e}");
        RunError::Generic
    })?;

    if args.compress != 0 {
        conn.compress(args.compress).map_err(|e| {
            tracing::error!("{e}");
            RunError::Generic
        })?;
    }

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let mut progress = std::io::stderr();

    let summary = convert::convert(&mut conn, &mut out, &mut progress).map_err(|e| {
        tracing::error!("{e}");
        RunError::Generic
    })?;

    print_summary(&summary, &conn).map_err(|e| {
        tracing::error!("failed to write summary: {e}");
        RunError::Generic
    })?;

    conn.close();
    Ok(())
}

fn print_summary(
    summary: &convert::Summary,
    conn: &cvs::connection::Connection,
) -> std::io::Result<()> {
    let mut stderr = std::io::stderr().lock();
    writeln!(
        stderr,
        "Emitted {} commits ({} total {}).",
        summary.emitted_commits,
        if summary.emitted_commits
            == summary.total_changesets - (summary.exact_branches
                + summary.exact_tags
                + summary.fixup_branches
                + summary.fixup_tags)
        {
            "="
        } else {
            "!="
        },
        summary.total_changesets,
    )?;
    writeln!(
        stderr,
        "Exact {:5} + {:5} = {:5} branches + tags.",
        summary.exact_branches,
        summary.exact_tags,
        summary.exact_branches + summary.exact_tags,
    )?;
    writeln!(
        stderr,
        "Fixup {:5} + {:5} = {:5} branches + tags.",
        summary.fixup_branches,
        summary.fixup_tags,
        summary.fixup_branches + summary.fixup_tags,
    )?;
    writeln!(
        stderr,
        "Download {} cvs versions in {} transactions.",
        conn.count_versions, conn.count_transactions,
    )?;
    Ok(())
}

fn init_logger() {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = tracing_subscriber::filter::LevelFilter::WARN;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}
