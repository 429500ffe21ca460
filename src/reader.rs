#![forbid(unsafe_code)]

use std::io::{self, BufRead, Read};
use std::path::Path;

use log::*;

use crate::buffer::{Config, DecodeBuffer, Mode};
use crate::error::Result;
use crate::strict_file::{OpenMode, StrictFile};

////////////////////////////////////////////////////////////////////////////////

/// A readable stream over a possibly gzip or zlib compressed source.
///
/// Wrapping `&mut R` leaves the source with the caller; wrapping `R` by
/// value (as `open` does with the file) hands it over.
pub struct ZReader<R> {
    buffer: DecodeBuffer<R>,
}

impl<R: Read> ZReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_config(source, Config::default())
    }

    pub fn with_config(source: R, config: Config) -> Self {
        Self {
            buffer: DecodeBuffer::with_config(source, config),
        }
    }

    pub fn mode(&self) -> Mode {
        self.buffer.mode()
    }

    pub fn get_ref(&self) -> &R {
        self.buffer.get_ref()
    }

    pub fn into_inner(self) -> R {
        self.buffer.into_inner()
    }
}

impl ZReader<StrictFile> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let file = StrictFile::open(path, OpenMode::READ | OpenMode::BINARY)?;
        info!("reading '{}'", file.path().display());
        Ok(Self::with_config(file, config))
    }
}

impl<R: Read> Read for ZReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for ZReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.buffer.pull().map_err(io::Error::from)
    }

    fn consume(&mut self, amt: usize) {
        self.buffer.consume(amt)
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, Error};

    use std::fs;
    use std::io::Write;

    use anyhow::Result;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    fn gzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    #[test]
    fn lines_of_compressed_text() -> Result<()> {
        let text = "alpha\nbeta\r\ngamma";
        let compressed = gzip(text.as_bytes())?;
        let lines = ZReader::new(compressed.as_slice())
            .lines()
            .collect::<io::Result<Vec<_>>>()?;
        assert_eq!(lines, ["alpha", "beta", "gamma"]);
        Ok(())
    }

    #[test]
    fn small_reads() -> Result<()> {
        let data: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        let compressed = gzip(&data)?;
        let mut reader =
            ZReader::with_config(compressed.as_slice(), Config::default().with_buffer_size(100));
        let mut result = Vec::new();
        let mut chunk = [0; 7];
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            result.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(result, data);
        Ok(())
    }

    #[test]
    fn borrowed_source_stays_usable() -> Result<()> {
        let mut source: &[u8] = b"plain";
        let mut content = String::new();
        ZReader::new(&mut source).read_to_string(&mut content)?;
        assert_eq!(content, "plain");
        assert!(source.is_empty());
        Ok(())
    }

    #[test]
    fn decode_errors_are_invalid_data() -> Result<()> {
        let mut compressed = gzip(b"0123456789")?;
        compressed.truncate(compressed.len() - 3);
        let err = ZReader::new(compressed.as_slice())
            .read_to_end(&mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<Error>());
        assert!(matches!(inner, Some(Error::Decode(e)) if *e == DecodeError::truncated()));
        Ok(())
    }

    #[test]
    fn open_files() -> Result<()> {
        let dir = tempdir()?;
        let plain = dir.path().join("plain.txt");
        let packed = dir.path().join("packed.txt.gz");
        fs::write(&plain, "one\ntwo\n")?;
        fs::write(&packed, gzip(b"one\ntwo\n")?)?;

        for path in [&plain, &packed] {
            let mut content = String::new();
            let mut reader = ZReader::open(path)?;
            reader.read_to_string(&mut content)?;
            assert_eq!(content, "one\ntwo\n");
            assert_eq!(reader.get_ref().path(), path.as_path());
        }

        let mut reader = ZReader::open(&packed)?;
        reader.read_to_end(&mut Vec::new())?;
        assert_eq!(reader.mode(), Mode::Inflating);

        let err = ZReader::open(dir.path().join("nope")).err().unwrap();
        assert!(matches!(err, Error::Io { .. }));
        Ok(())
    }

    #[test]
    fn io_copy_through_reader() -> Result<()> {
        let data = b"copied through io::copy".repeat(1000);
        let compressed = gzip(&data)?;
        let mut out = Vec::new();
        io::copy(
            &mut ZReader::with_config(compressed.as_slice(), Config::default().with_buffer_size(512)),
            &mut out,
        )?;
        assert_eq!(out, data);
        Ok(())
    }
}
