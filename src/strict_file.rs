#![forbid(unsafe_code)]

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::process;

use log::*;

use crate::error::{Error, Result};

////////////////////////////////////////////////////////////////////////////////

const MODE_NAMES: [(OpenMode, &str); 6] = [
    (OpenMode::READ, "in"),
    (OpenMode::WRITE, "out"),
    (OpenMode::APPEND, "app"),
    (OpenMode::AT_END, "ate"),
    (OpenMode::TRUNCATE, "trunc"),
    (OpenMode::BINARY, "binary"),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenMode(u8);

impl OpenMode {
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const APPEND: Self = Self(1 << 2);
    pub const AT_END: Self = Self(1 << 3);
    pub const TRUNCATE: Self = Self(1 << 4);
    pub const BINARY: Self = Self(1 << 5);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x3f)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn reads(self) -> bool {
        self.contains(Self::READ)
    }

    /// `app` implies writing even without `out`.
    pub fn writes(self) -> bool {
        self.contains(Self::WRITE) || self.contains(Self::APPEND)
    }

    /// Reject mode combinations that no open call could honour.
    pub fn validate(self) -> Result<(), &'static str> {
        let truncate = self.contains(Self::TRUNCATE);
        if truncate && !self.contains(Self::WRITE) {
            return Err("trunc but not out");
        }
        if truncate && self.contains(Self::APPEND) {
            return Err("trunc and app");
        }
        if !self.reads() && !self.writes() {
            return Err("neither in nor out");
        }
        Ok(())
    }

    /// Whether opening with this mode may bring a missing file into existence.
    fn creates(self) -> bool {
        self.writes() && (!self.reads() || self.contains(Self::APPEND) || self.contains(Self::TRUNCATE))
    }

    fn options(self) -> OpenOptions {
        let append = self.contains(Self::APPEND);
        let truncate =
            self.contains(Self::TRUNCATE) || (self.contains(Self::WRITE) && !self.reads() && !append);

        let mut options = OpenOptions::new();
        options
            .read(self.reads())
            .write(self.writes() && !append)
            .append(append)
            .truncate(truncate)
            .create(self.creates());
        options
    }
}

impl BitOr for OpenMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in MODE_NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// A file that is known to be usable in the mode it was opened with.
///
/// Read modes are checked by reading one byte ahead; that byte is handed out
/// by the first `read`, so nothing is lost even on pipes.
#[derive(Debug)]
pub struct StrictFile {
    file: File,
    path: PathBuf,
    mode: OpenMode,
    peeked: Option<u8>,
}

impl StrictFile {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        if let Err(reason) = mode.validate() {
            return Err(Error::Config {
                path: path.to_owned(),
                mode,
                reason,
            });
        }

        let io_error = |op: &'static str, source: io::Error| Error::Io {
            op,
            path: Some(path.to_owned()),
            mode: Some(mode),
            source,
        };

        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::IsDirectory {
                    path: path.to_owned(),
                })
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound && mode.creates() => {}
            Err(err) => return Err(io_error("stat", err)),
        }

        let mut file = mode.options().open(path).map_err(|err| io_error("open", err))?;
        if mode.contains(OpenMode::AT_END) {
            file.seek(SeekFrom::End(0))
                .map_err(|err| io_error("seek", err))?;
        }

        let mut peeked = None;
        if mode.reads() {
            let mut byte = [0u8; 1];
            loop {
                match file.read(&mut byte) {
                    Ok(0) => break,
                    Ok(_) => {
                        peeked = Some(byte[0]);
                        break;
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(io_error("open", err)),
                }
            }
        }

        debug!("opened '{}' ({})", path.display(), mode);
        Ok(Self {
            file,
            path: path.to_owned(),
            mode,
            peeked,
        })
    }

    /// Open `path` or terminate the process with a diagnostic on stderr.
    pub fn open_or_exit(path: impl AsRef<Path>, mode: OpenMode) -> Self {
        match Self::open(path, mode) {
            Ok(file) => file,
            Err(err) => {
                error!("{}", err);
                eprintln!("strict_file: {}", err);
                process::exit(1);
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    // Give the lookahead byte back to the file before moving the cursor.
    fn unpeek(&mut self) -> io::Result<()> {
        if self.peeked.take().is_some() {
            self.file.seek(SeekFrom::Current(-1))?;
        }
        Ok(())
    }
}

impl Read for StrictFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.peeked.take() {
            Some(byte) => {
                buf[0] = byte;
                let n = match self.file.read(&mut buf[1..]) {
                    Ok(n) => n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => 0,
                    Err(err) => {
                        self.peeked = Some(byte);
                        return Err(err);
                    }
                };
                Ok(n + 1)
            }
            None => self.file.read(buf),
        }
    }
}

impl Write for StrictFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.unpeek()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for StrictFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.unpeek()?;
        self.file.seek(pos)
    }
}

////////////////////////////////////////////////////////////////////////////////
