use std::io::{BufRead, BufReader, Read, Write};

use crate::errors::Fatal;

const VALID_RESPONSES: &str = "ok error Valid-requests Checked-in New-entry \
     Checksum Copy-file Updated Created Update-existing Merged \
     Patched Rcs-diff Mode Mod-time Removed Remove-entry \
     Set-static-directory Clear-static-directory Set-sticky \
     Clear-sticky Template Notified Module-expansion \
     Wrapper-rcsOption M Mbinary E F MT";

/// How to reach the server, parsed from the CVS root string.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Root {
    /// `:pserver:[user@]host[:port]/path`
    Pserver {
        user: Option<String>,
        host: String,
        port: u16,
        path: String,
    },
    /// `:ext:host/path`, `:ext:host:/path`, or a bare `host/path`
    Ext { host: String, path: String },
    /// `:fake:prog:arg:/path`
    Fake {
        program: String,
        argument: String,
        path: String,
    },
    /// bare `/path`: fork a local `cvs server`
    Fork { path: String },
}

impl Root {
    pub(crate) fn parse(root: &str) -> Result<Self, Fatal> {
        if let Some(rest) = root.strip_prefix(":pserver:") {
            let slash = rest
                .find('/')
                .ok_or_else(|| Fatal::Malformed(format!("no path in CVS root '{root}'")))?;
            let path = rest[slash..].to_owned();
            let mut hostport = &rest[..slash];

            let user = match hostport.find('@') {
                Some(at) => {
                    let user = hostport[..at].to_owned();
                    hostport = &hostport[at + 1..];
                    Some(user)
                }
                None => None,
            };

            let (host, port) = match hostport.find(':') {
                Some(colon) => {
                    let port = hostport[colon + 1..].parse().map_err(|_| {
                        Fatal::Malformed(format!("bad port in CVS root '{root}'"))
                    })?;
                    (hostport[..colon].to_owned(), port)
                }
                None => (hostport.to_owned(), 2401),
            };

            Ok(Self::Pserver {
                user,
                host,
                port,
                path,
            })
        } else if let Some(rest) = root.strip_prefix(":fake:") {
            let colon1 = rest
                .find(':')
                .ok_or_else(|| Fatal::Malformed(format!("root '{root}' has no remote root")))?;
            let colon2 = rest[colon1 + 1..]
                .find(':')
                .map(|i| colon1 + 1 + i)
                .ok_or_else(|| Fatal::Malformed(format!("root '{root}' has no remote root")))?;
            Ok(Self::Fake {
                program: rest[..colon1].to_owned(),
                argument: rest[colon1 + 1..colon2].to_owned(),
                path: rest[colon2 + 1..].to_owned(),
            })
        } else if let Some(rest) = root.strip_prefix(":ext:") {
            Self::parse_ext(root, rest)
        } else if root.starts_with('/') {
            Ok(Self::Fork {
                path: root.to_owned(),
            })
        } else if root.contains(':') || root.contains('/') {
            Self::parse_ext(root, root)
        } else {
            Err(Fatal::Malformed(format!("cannot interpret CVS root '{root}'")))
        }
    }

    fn parse_ext(root: &str, rest: &str) -> Result<Self, Fatal> {
        let split = rest
            .find([':', '/'])
            .ok_or_else(|| Fatal::Malformed(format!("root '{root}' has no remote root")))?;
        let host = rest[..split].to_owned();
        let path = rest[split..].trim_start_matches(':').to_owned();
        if host.is_empty() || path.is_empty() {
            return Err(Fatal::Malformed(format!("root '{root}' has no remote root")));
        }
        Ok(Self::Ext { host, path })
    }

    pub(crate) fn path(&self) -> &str {
        match *self {
            Self::Pserver { ref path, .. } => path,
            Self::Ext { ref path, .. } => path,
            Self::Fake { ref path, .. } => path,
            Self::Fork { ref path } => path,
        }
    }
}

/// A connection to a CVS server: line-oriented, strictly
/// request/response. Every send is flushed before the response is read.
pub(crate) struct Connection {
    reader: Box<dyn BufRead>,
    writer: Box<dyn Write>,
    // Kept so child-process transports outlive the streams.
    child: Option<std::process::Child>,
    pub(crate) remote_root: String,
    pub(crate) module: String,
    /// `<remote_root>/<module>/`, the prefix of every repository path the
    /// server reports.
    pub(crate) prefix: String,
    pub(crate) count_versions: u64,
    pub(crate) count_transactions: u64,
}

impl Connection {
    pub(crate) fn connect(root: &str, module: &str) -> Result<Self, Fatal> {
        let parsed = Root::parse(root)?;
        let remote_root = parsed.path().to_owned();

        let (reader, writer, child): (Box<dyn BufRead>, Box<dyn Write>, _) = match parsed {
            Root::Pserver {
                user,
                host,
                port,
                path,
            } => {
                let stream = std::net::TcpStream::connect((host.as_str(), port))?;
                let mut writer: Box<dyn Write> = Box::new(stream.try_clone()?);
                let mut reader: Box<dyn BufRead> = Box::new(BufReader::new(stream));
                pserver_auth(root, &mut *reader, &mut *writer, user.as_deref(), &path)?;
                (reader, writer, None)
            }
            Root::Ext { host, path: _ } => {
                let rsh = std::env::var("CVS_RSH").unwrap_or_else(|_| "ssh".to_owned());
                spawn_server(&rsh, &[host.as_str(), "cvs", "server"])?
            }
            Root::Fake {
                program,
                argument,
                path: _,
            } => spawn_server(&program, &[argument.as_str()])?,
            Root::Fork { path: _ } => spawn_server("cvs", &["server"])?,
        };

        let mut conn = Self {
            reader,
            writer,
            child,
            remote_root,
            module: module.to_owned(),
            prefix: String::new(),
            count_versions: 0,
            count_transactions: 0,
        };
        conn.prefix = format!("{}/{}/", conn.remote_root, conn.module);

        conn.send(&format!(
            "Root {}\nValid-responses {}\nvalid-requests\nUseUnchanged\n",
            conn.remote_root, VALID_RESPONSES,
        ))?;
        conn.flush()?;

        let line = conn.next_line()?;
        if !line.starts_with("Valid-requests ") {
            return Err(Fatal::Protocol(format!("did not get valid requests ('{line}')")));
        }
        tracing::debug!("{line}");

        let line = conn.next_line()?;
        if line != "ok" {
            return Err(Fatal::Protocol(format!("did not get 'ok' ('{line}')")));
        }

        Ok(conn)
    }

    /// Switches both directions of the transport to zlib streams.
    pub(crate) fn compress(&mut self, level: u32) -> Result<(), Fatal> {
        self.send(&format!("Gzip-stream {level}\n"))?;
        self.flush()?;

        let reader = std::mem::replace(&mut self.reader, Box::new(std::io::empty()));
        self.reader = Box::new(BufReader::new(flate2::read::ZlibDecoder::new(reader)));

        let writer = std::mem::replace(&mut self.writer, Box::new(std::io::sink()));
        self.writer = Box::new(flate2::write::ZlibEncoder::new(
            writer,
            flate2::Compression::new(level),
        ));
        Ok(())
    }

    pub(crate) fn send(&mut self, data: &str) -> Result<(), Fatal> {
        self.writer.write_all(data.as_bytes())?;
        Ok(())
    }

    /// Flush pending request data; with compression this forces a zlib
    /// sync point so the server sees the full request.
    pub(crate) fn flush(&mut self) -> Result<(), Fatal> {
        self.writer.flush()?;
        Ok(())
    }

    pub(crate) fn next_line(&mut self) -> Result<String, Fatal> {
        next_line_from(&mut self.reader)
    }

    /// A connection fed from a canned byte buffer, for protocol tests.
    #[cfg(test)]
    pub(crate) fn fake(remote_root: &str, module: &str, input: &[u8]) -> Self {
        Self {
            reader: Box::new(std::io::Cursor::new(input.to_vec())),
            writer: Box::new(std::io::sink()),
            child: None,
            remote_root: remote_root.to_owned(),
            module: module.to_owned(),
            prefix: format!("{remote_root}/{module}/"),
            count_versions: 0,
            count_transactions: 0,
        }
    }

    /// Drops both stream halves and reaps a child-process transport.
    pub(crate) fn close(self) {
        let Self {
            reader,
            writer,
            child,
            ..
        } = self;
        drop(writer);
        drop(reader);
        if let Some(mut child) = child {
            match child.wait() {
                Ok(status) if !status.success() => {
                    tracing::warn!("server process exited with {status}");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("failed to wait for server process: {e}"),
            }
        }
    }

    /// Copies exactly `len` bytes of file data from the server, either
    /// into `out` or to nowhere (duplicate blobs are discarded).
    pub(crate) fn read_block(
        &mut self,
        len: u64,
        out: Option<&mut dyn Write>,
    ) -> Result<(), Fatal> {
        let mut limited = (&mut self.reader).take(len);
        let copied = match out {
            Some(out) => std::io::copy(&mut limited, out)?,
            None => std::io::copy(&mut limited, &mut std::io::sink())?,
        };
        if copied != len {
            return Err(Fatal::Protocol(format!(
                "unexpected EOF in file data ({copied} of {len} bytes)"
            )));
        }
        Ok(())
    }
}

fn next_line_from(reader: &mut dyn BufRead) -> Result<String, Fatal> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Err(Fatal::Protocol("unexpected EOF from server".to_owned()));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.contains(&0) {
        return Err(Fatal::Protocol("got line containing NUL from server".to_owned()));
    }
    String::from_utf8(buf)
        .map_err(|e| Fatal::Protocol(format!("got non-UTF-8 line from server: {e}")))
}

fn spawn_server(
    program: &str,
    args: &[&str],
) -> Result<(Box<dyn BufRead>, Box<dyn Write>, Option<std::process::Child>), Fatal> {
    let mut child = std::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .spawn()
        .map_err(|e| Fatal::Io(std::io::Error::other(format!("failed to spawn {program}: {e}"))))?;

    let stdout = child.stdout.take().unwrap();
    let stdin = child.stdin.take().unwrap();
    Ok((
        Box::new(BufReader::new(stdout)),
        Box::new(stdin),
        Some(child),
    ))
}

fn pserver_auth(
    root: &str,
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
    user: Option<&str>,
    path: &str,
) -> Result<(), Fatal> {
    let user = match user {
        Some(u) => u.to_owned(),
        None => std::env::var("USER").map_err(|_| {
            Fatal::Malformed(format!("cannot determine user name for '{root}'"))
        })?,
    };

    let password = pserver_password(root);
    write!(
        writer,
        "BEGIN AUTH REQUEST\n{path}\n{user}\n{password}\nEND AUTH REQUEST\n"
    )?;
    writer.flush()?;

    let line = next_line_from(reader)?;
    if line != "I LOVE YOU" {
        return Err(Fatal::Protocol(format!("failed to login: '{line}'")));
    }
    tracing::debug!("pserver login as {user} succeeded");
    Ok(())
}

/// Looks the root up in `$HOME/.cvspass`. The file stores the scrambled
/// password as-is; "A" is the scrambled empty password.
fn pserver_password(root: &str) -> String {
    let Ok(home) = std::env::var("HOME") else {
        return "A".to_owned();
    };
    let Ok(contents) = std::fs::read_to_string(format!("{home}/.cvspass")) else {
        return "A".to_owned();
    };
    lookup_password(&contents, root).unwrap_or_else(|| "A".to_owned())
}

fn lookup_password(cvspass: &str, root: &str) -> Option<String> {
    for line in cvspass.lines() {
        let line = line.strip_prefix("/1 ").unwrap_or(line);
        if let Some(rest) = line.strip_prefix(root) {
            if let Some(password) = rest.strip_prefix(' ') {
                return Some(password.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::{lookup_password, Root};

    #[test]
    fn test_parse_pserver() {
        assert_eq!(
            Root::parse(":pserver:anoncvs@cvs.example.org/var/cvs").unwrap(),
            Root::Pserver {
                user: Some("anoncvs".to_owned()),
                host: "cvs.example.org".to_owned(),
                port: 2401,
                path: "/var/cvs".to_owned(),
            },
        );
        assert_eq!(
            Root::parse(":pserver:cvs.example.org:2402/var/cvs").unwrap(),
            Root::Pserver {
                user: None,
                host: "cvs.example.org".to_owned(),
                port: 2402,
                path: "/var/cvs".to_owned(),
            },
        );
        assert!(Root::parse(":pserver:cvs.example.org").is_err());
    }

    #[test]
    fn test_parse_ext_and_friends() {
        assert_eq!(
            Root::parse(":ext:cvs.example.org:/var/cvs").unwrap(),
            Root::Ext {
                host: "cvs.example.org".to_owned(),
                path: "/var/cvs".to_owned(),
            },
        );
        assert_eq!(
            Root::parse("cvs.example.org/var/cvs").unwrap(),
            Root::Ext {
                host: "cvs.example.org".to_owned(),
                path: "/var/cvs".to_owned(),
            },
        );
        assert_eq!(
            Root::parse(":fake:cat:dump.txt:/var/cvs").unwrap(),
            Root::Fake {
                program: "cat".to_owned(),
                argument: "dump.txt".to_owned(),
                path: "/var/cvs".to_owned(),
            },
        );
        assert_eq!(
            Root::parse("/var/cvs").unwrap(),
            Root::Fork {
                path: "/var/cvs".to_owned(),
            },
        );
    }

    #[test]
    fn test_lookup_password() {
        let cvspass = "/1 :pserver:fred@h:2401/cvs Ay=0=\n:pserver:other@h/cvs B\n";
        assert_eq!(
            lookup_password(cvspass, ":pserver:fred@h:2401/cvs").as_deref(),
            Some("Ay=0="),
        );
        assert_eq!(
            lookup_password(cvspass, ":pserver:other@h/cvs").as_deref(),
            Some("B"),
        );
        assert_eq!(lookup_password(cvspass, ":pserver:nobody@h/cvs"), None);
    }
}
