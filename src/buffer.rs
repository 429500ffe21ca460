#![forbid(unsafe_code)]

use std::io::{self, Read};
use std::mem;

use log::*;

use crate::error::{DecodeError, Error, Result};
use crate::inflate::{Inflater, Status};

////////////////////////////////////////////////////////////////////////////////

pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

// Detection needs two bytes to land in the input buffer.
const MIN_BUFFER_SIZE: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub buffer_size: usize,
    /// When off, every stream is inflated without looking at its first bytes.
    pub auto_detect: bool,
}

impl Config {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_auto_detect(mut self, auto_detect: bool) -> Self {
        self.auto_detect = auto_detect;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            auto_detect: true,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Undetermined,
    Passthrough,
    Inflating,
}

/// True for a gzip member or a zlib stream header.
pub fn is_compressed_signature(b0: u8, b1: u8) -> bool {
    matches!((b0, b1), (0x1f, 0x8b) | (0x78, 0x01 | 0x9c | 0xda))
}

////////////////////////////////////////////////////////////////////////////////

/// Double-buffered decoder sitting on top of a byte source.
///
/// The first two bytes of the source decide whether the payload is inflated
/// or forwarded as is. Forwarded chunks are never copied: the filled input
/// buffer simply becomes the output buffer.
pub struct DecodeBuffer<R> {
    source: R,
    in_buf: Vec<u8>,
    in_start: usize,
    in_end: usize,
    out_buf: Vec<u8>,
    out_start: usize,
    out_end: usize,
    engine: Option<Inflater>,
    mode: Mode,
    stream_ended: bool,
    failed: bool,
}

impl<R: Read> DecodeBuffer<R> {
    pub fn new(source: R) -> Self {
        Self::with_config(source, Config::default())
    }

    pub fn with_config(source: R, config: Config) -> Self {
        let buffer_size = config.buffer_size.max(MIN_BUFFER_SIZE);
        debug!(
            "decode buffer: {} bytes per buffer, auto detect: {}",
            buffer_size, config.auto_detect
        );
        Self {
            source,
            in_buf: vec![0; buffer_size],
            in_start: 0,
            in_end: 0,
            out_buf: vec![0; buffer_size],
            out_start: 0,
            out_end: 0,
            engine: None,
            mode: if config.auto_detect {
                Mode::Undetermined
            } else {
                Mode::Inflating
            },
            stream_ended: false,
            failed: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn buffer_size(&self) -> usize {
        self.in_buf.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Return the unread decoded bytes, refilling them first if none are left.
    ///
    /// An empty slice means the end of data. After an error every later call
    /// fails with `Error::Poisoned`.
    pub fn pull(&mut self) -> Result<&[u8]> {
        if self.failed {
            return Err(Error::Poisoned);
        }
        if self.out_start == self.out_end {
            if let Err(err) = self.refill() {
                self.failed = true;
                self.engine = None;
                return Err(err);
            }
        }
        Ok(&self.out_buf[self.out_start..self.out_end])
    }

    pub fn consume(&mut self, amt: usize) {
        self.out_start = self.out_end.min(self.out_start + amt);
    }

    fn refill(&mut self) -> Result<()> {
        let mut free_start = 0;

        while free_start == 0 {
            if self.stream_ended {
                let trailing = self.in_end - self.in_start;
                if trailing > 0 {
                    warn!("discarding {} bytes after the end of the compressed stream", trailing);
                }
                self.in_start = self.in_end;
                break;
            }

            if self.in_start == self.in_end {
                self.in_start = 0;
                self.in_end = self.read_chunk()?;
                trace!("pulled {} bytes from the source", self.in_end);
                if self.in_end == 0 {
                    match self.engine.as_mut() {
                        Some(engine) => {
                            // The source is done but the engine may still hold output.
                            let feed = engine.feed(&[], &mut self.out_buf[free_start..])?;
                            free_start += feed.produced;
                            if feed.status == Status::StreamEnd {
                                self.end_stream();
                            } else if feed.produced == 0 {
                                return Err(DecodeError::truncated().into());
                            }
                            continue;
                        }
                        None => {
                            if self.mode == Mode::Undetermined {
                                self.mode = Mode::Passthrough;
                            }
                            break;
                        }
                    }
                }
            }

            if self.mode == Mode::Undetermined {
                let window = &self.in_buf[self.in_start..self.in_end];
                self.mode = if window.len() >= 2 && is_compressed_signature(window[0], window[1]) {
                    Mode::Inflating
                } else {
                    Mode::Passthrough
                };
                info!("stream mode: {:?}", self.mode);
            }

            match self.mode {
                Mode::Passthrough => {
                    debug_assert_eq!(self.in_start, 0);
                    mem::swap(&mut self.in_buf, &mut self.out_buf);
                    free_start = self.in_end;
                    self.in_start = 0;
                    self.in_end = 0;
                }
                _ => {
                    let engine = self.engine.get_or_insert_with(|| {
                        info!("creating inflate engine");
                        Inflater::new()
                    });
                    let feed = engine.feed(
                        &self.in_buf[self.in_start..self.in_end],
                        &mut self.out_buf[free_start..],
                    )?;
                    self.in_start += feed.consumed;
                    free_start += feed.produced;
                    if feed.status == Status::StreamEnd {
                        self.end_stream();
                    }
                }
            }
        }

        self.out_start = 0;
        self.out_end = free_start;
        Ok(())
    }

    fn end_stream(&mut self) {
        info!("compressed stream ended, dropping inflate engine");
        self.engine = None;
        self.stream_ended = true;
    }

    /// One pull from the source into the whole input buffer.
    ///
    /// Before the mode is known, keeps pulling until two bytes are present
    /// or the source runs dry, so the decision does not depend on chunking.
    fn read_chunk(&mut self) -> Result<usize> {
        let mut filled = read_retrying(&mut self.source, &mut self.in_buf)?;
        if self.mode == Mode::Undetermined {
            while filled > 0 && filled < MIN_BUFFER_SIZE {
                let n = read_retrying(&mut self.source, &mut self.in_buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }
        Ok(filled)
    }
}

fn read_retrying<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match source.read(buf) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::source_read(err)),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
