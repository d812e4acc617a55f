use std::io::Write;

use crate::errors::Fatal;

/// Identifier of a blob or commit record in the fast-import stream.
/// Blobs and commits share one monotone counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Mark(u32);

impl std::fmt::Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// Writer of git fast-import records.
///
/// Owns the mark counter; every record that needs an identity allocates
/// the next one here, so identical inputs always yield identical streams.
pub(crate) struct FastImport<'a> {
    out: &'a mut dyn Write,
    next_mark: u32,
}

impl<'a> FastImport<'a> {
    pub(crate) fn new(out: &'a mut dyn Write) -> Self {
        Self { out, next_mark: 1 }
    }

    pub(crate) fn alloc_mark(&mut self) -> Mark {
        let mark = Mark(self.next_mark);
        self.next_mark += 1;
        mark
    }

    /// Starts a blob record; the caller must write exactly `len` bytes to
    /// `raw()` and then call `end_blob`.
    pub(crate) fn begin_blob(&mut self, len: u64) -> Result<Mark, Fatal> {
        let mark = self.alloc_mark();
        write!(self.out, "blob\nmark {mark}\ndata {len}\n")?;
        Ok(mark)
    }

    pub(crate) fn raw(&mut self) -> &mut dyn Write {
        self.out
    }

    pub(crate) fn end_blob(&mut self) -> Result<(), Fatal> {
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Commit header up to and including the log message. `M`/`D` lines
    /// follow via `modify`/`delete`.
    pub(crate) fn begin_commit(
        &mut self,
        refname: &str,
        author: &str,
        time: i64,
        log: &str,
    ) -> Result<Mark, Fatal> {
        let mark = self.alloc_mark();
        write!(self.out, "commit {refname}\nmark {mark}\n")?;
        write!(self.out, "committer {author} <{author}> {time} +0000\n")?;
        write!(self.out, "data {}\n{}\n", log.len(), log)?;
        Ok(mark)
    }

    pub(crate) fn modify(&mut self, exec: bool, mark: Mark, path: &str) -> Result<(), Fatal> {
        let mode = if exec { "755" } else { "644" };
        write!(self.out, "M {mode} {mark} {path}\n")?;
        Ok(())
    }

    pub(crate) fn delete(&mut self, path: &str) -> Result<(), Fatal> {
        write!(self.out, "D {path}\n")?;
        Ok(())
    }

    pub(crate) fn reset(&mut self, refname: &str, from: Option<Mark>) -> Result<(), Fatal> {
        write!(self.out, "reset {refname}\n")?;
        if let Some(from) = from {
            write!(self.out, "from {from}\n\n")?;
        }
        Ok(())
    }

    pub(crate) fn progress_done(&mut self) -> Result<(), Fatal> {
        self.out.write_all(b"progress done\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write as _;

    use super::FastImport;

    #[test]
    fn test_records() {
        let mut buf = Vec::new();
        let mut out = FastImport::new(&mut buf);

        let b = out.begin_blob(3).unwrap();
        out.raw().write_all(b"hi\n").unwrap();
        out.end_blob().unwrap();
        assert_eq!(b.to_string(), ":1");

        let c = out
            .begin_commit("refs/heads/cvs_master", "fred", 100, "init")
            .unwrap();
        out.modify(false, b, "dir/a").unwrap();
        out.delete("b").unwrap();
        assert_eq!(c.to_string(), ":2");

        out.reset("refs/tags/T1", Some(c)).unwrap();
        out.progress_done().unwrap();

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "blob\nmark :1\ndata 3\nhi\n\n\
             commit refs/heads/cvs_master\nmark :2\n\
             committer fred <fred> 100 +0000\ndata 4\ninit\n\
             M 644 :1 dir/a\nD b\n\
             reset refs/tags/T1\nfrom :2\n\n\
             progress done\n",
        );
    }

    #[test]
    fn test_exec_mode() {
        let mut buf = Vec::new();
        let mut out = FastImport::new(&mut buf);
        let b = out.begin_blob(0).unwrap();
        out.end_blob().unwrap();
        out.modify(true, b, "tool.sh").unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("M 755 :1 tool.sh\n"));
    }
}
