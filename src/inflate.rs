#![forbid(unsafe_code)]

use std::mem;

use flate2::{Decompress, FlushDecompress};
use log::*;

use crate::error::{DecodeError, Z_BUF_ERROR, Z_STREAM_ERROR};
use crate::gzip::{self, MemberChecksum, MemberFooter, FOOTER_SIZE};

////////////////////////////////////////////////////////////////////////////////

// Longest gzip header accepted while it is still incomplete.
const MAX_HEADER_SIZE: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Continue,
    StreamEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Feed {
    pub consumed: usize,
    pub produced: usize,
    pub status: Status,
}

enum Framing {
    Zlib,
    Gzip(MemberChecksum),
}

enum Stage {
    Detect,
    Header(Vec<u8>),
    Body(Decompress, Framing),
    Footer(Vec<u8>, MemberChecksum),
    Done,
}

/// One inflate context, accepting either a gzip member or a zlib stream.
///
/// The framing is picked from the first byte fed, the same way zlib does it
/// with automatic header detection.
pub struct Inflater {
    stage: Stage,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            stage: Stage::Detect,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    /// Run one decode step over `input`, writing into `output`.
    ///
    /// Header and trailer bytes are consumed without producing output. After
    /// `Status::StreamEnd` the inflater accepts nothing more.
    pub fn feed(&mut self, input: &[u8], output: &mut [u8]) -> Result<Feed, DecodeError> {
        let mut consumed = 0;
        let mut produced = 0;

        loop {
            let rest = &input[consumed..];
            let stage = mem::replace(&mut self.stage, Stage::Done);
            self.stage = match stage {
                Stage::Detect => {
                    if rest.is_empty() {
                        self.stage = Stage::Detect;
                        break;
                    }
                    if rest[0] == gzip::ID1 {
                        debug!("inflater: gzip framing");
                        Stage::Header(Vec::new())
                    } else {
                        debug!("inflater: zlib framing");
                        Stage::Body(Decompress::new(true), Framing::Zlib)
                    }
                }
                Stage::Header(mut pending) => {
                    let (used, header) = match parse_header(&pending, rest)? {
                        Some(parsed) => parsed,
                        None => {
                            pending.extend_from_slice(rest);
                            consumed = input.len();
                            if pending.len() > MAX_HEADER_SIZE {
                                return Err(DecodeError::data("gzip header too long"));
                            }
                            self.stage = Stage::Header(pending);
                            break;
                        }
                    };
                    info!(
                        "inflater: gzip member header parsed ({} bytes, text: {})",
                        pending.len() + used,
                        header.is_text
                    );
                    consumed += used;
                    Stage::Body(Decompress::new(false), Framing::Gzip(MemberChecksum::new()))
                }
                Stage::Body(mut inflate, mut framing) => {
                    let out = &mut output[produced..];
                    let before_in = inflate.total_in();
                    let before_out = inflate.total_out();
                    let status = inflate.decompress(rest, out, FlushDecompress::None)?;
                    let step_in = (inflate.total_in() - before_in) as usize;
                    let step_out = (inflate.total_out() - before_out) as usize;

                    if let Framing::Gzip(checksum) = &mut framing {
                        checksum.update(&out[..step_out]);
                    }
                    consumed += step_in;
                    produced += step_out;

                    match status {
                        flate2::Status::StreamEnd => match framing {
                            Framing::Zlib => {
                                return Ok(self.finish(consumed, produced));
                            }
                            Framing::Gzip(checksum) => {
                                Stage::Footer(Vec::with_capacity(FOOTER_SIZE), checksum)
                            }
                        },
                        _ => {
                            if step_in == 0 && step_out == 0 && !rest.is_empty() && !out.is_empty()
                            {
                                return Err(DecodeError::new(Z_BUF_ERROR, "no progress possible"));
                            }
                            self.stage = Stage::Body(inflate, framing);
                            break;
                        }
                    }
                }
                Stage::Footer(mut pending, checksum) => {
                    let take = rest.len().min(FOOTER_SIZE - pending.len());
                    pending.extend_from_slice(&rest[..take]);
                    consumed += take;
                    if pending.len() < FOOTER_SIZE {
                        self.stage = Stage::Footer(pending, checksum);
                        break;
                    }
                    let footer = MemberFooter::parse(&mut pending.as_slice())
                        .map_err(|err| DecodeError::data(format!("{:#}", err)))?;
                    checksum
                        .verify(&footer)
                        .map_err(|err| DecodeError::data(format!("{:#}", err)))?;
                    return Ok(self.finish(consumed, produced));
                }
                Stage::Done => {
                    return Err(DecodeError::new(
                        Z_STREAM_ERROR,
                        "inflater used after stream end",
                    ));
                }
            };
        }

        Ok(Feed {
            consumed,
            produced,
            status: Status::Continue,
        })
    }

    fn finish(&mut self, consumed: usize, produced: usize) -> Feed {
        info!("inflater: logical stream end");
        self.stage = Stage::Done;
        Feed {
            consumed,
            produced,
            status: Status::StreamEnd,
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

/// Try to parse a gzip header spread over `pending` followed by `rest`.
///
/// Returns how many bytes of `rest` the header used, or `None` when more
/// input is needed.
fn parse_header(
    pending: &[u8],
    rest: &[u8],
) -> Result<Option<(usize, gzip::MemberHeader)>, DecodeError> {
    let joined;
    let window = if pending.is_empty() {
        rest
    } else {
        joined = [pending, rest].concat();
        &joined
    };

    let mut cursor = window;
    match gzip::parse_header(&mut cursor) {
        Ok(header) => {
            let used = window.len() - cursor.len() - pending.len();
            Ok(Some((used, header)))
        }
        Err(err) if gzip::is_incomplete(&err) => Ok(None),
        Err(err) => Err(DecodeError::data(format!("{:#}", err))),
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Z_DATA_ERROR;

    use std::io::Write;

    use anyhow::Result;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::{Compression, GzBuilder};

    fn gzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn zlib(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    /// Feed `input` in chunks of `in_step` into an output window of `out_step`.
    fn inflate(input: &[u8], in_step: usize, out_step: usize) -> Result<Vec<u8>, DecodeError> {
        let mut inflater = Inflater::new();
        let mut result = Vec::new();
        let mut out = vec![0; out_step];
        let mut pos = 0;
        loop {
            let end = input.len().min(pos + in_step);
            let feed = inflater.feed(&input[pos..end], &mut out)?;
            result.extend_from_slice(&out[..feed.produced]);
            pos += feed.consumed;
            if feed.status == Status::StreamEnd {
                assert!(inflater.is_finished());
                return Ok(result);
            }
            if pos == input.len() && feed.produced == 0 {
                return Err(DecodeError::truncated());
            }
        }
    }

    fn sample() -> Vec<u8> {
        (0..20_000u32)
            .flat_map(|i| format!("line {} of the sample\n", i % 97).into_bytes())
            .collect()
    }

    #[test]
    fn gzip_member() -> Result<()> {
        let data = sample();
        let compressed = gzip(&data)?;
        assert_eq!(inflate(&compressed, compressed.len(), 1 << 20)?, data);
        assert_eq!(inflate(&compressed, 1, 7)?, data);
        assert_eq!(inflate(&compressed, 4096, 100)?, data);
        Ok(())
    }

    #[test]
    fn zlib_stream() -> Result<()> {
        let data = sample();
        let compressed = zlib(&data)?;
        assert_eq!(&compressed[..2], &[0x78, 0xda]);
        assert_eq!(inflate(&compressed, 1, 1)?, data);
        assert_eq!(inflate(&compressed, 333, 1 << 16)?, data);
        Ok(())
    }

    #[test]
    fn named_gzip_header_split_byte_by_byte() -> Result<()> {
        let mut encoder = GzBuilder::new()
            .filename("sample.txt")
            .comment("made by a test")
            .extra(vec![7; 40])
            .write(Vec::new(), Compression::fast());
        encoder.write_all(b"hi")?;
        let compressed = encoder.finish()?;

        assert_eq!(inflate(&compressed, 1, 16)?, b"hi");
        Ok(())
    }

    #[test]
    fn stops_at_member_end() -> Result<()> {
        let mut compressed = gzip(b"first")?;
        let member_len = compressed.len();
        compressed.extend(gzip(b"second")?);

        let mut inflater = Inflater::new();
        let mut out = vec![0; 64];
        let feed = inflater.feed(&compressed, &mut out)?;
        assert_eq!(feed.status, Status::StreamEnd);
        assert_eq!(feed.consumed, member_len);
        assert_eq!(&out[..feed.produced], b"first");
        assert!(inflater.feed(&compressed[member_len..], &mut out).is_err());
        Ok(())
    }

    #[test]
    fn corrupted_crc() -> Result<()> {
        let mut compressed = gzip(b"some payload")?;
        let crc_pos = compressed.len() - 8;
        compressed[crc_pos] ^= 1;
        let err = inflate(&compressed, 5, 5).unwrap_err();
        assert_eq!(err.code(), Z_DATA_ERROR);
        assert!(err.message().contains("crc32"));
        Ok(())
    }

    #[test]
    fn corrupted_length() -> Result<()> {
        let mut compressed = gzip(b"some payload")?;
        let size_pos = compressed.len() - 4;
        compressed[size_pos] += 1;
        let err = inflate(&compressed, 100, 100).unwrap_err();
        assert!(err.message().contains("length"));
        Ok(())
    }

    #[test]
    fn garbage_body() {
        let input = [0x78, 0x9c, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let err = inflate(&input, 8, 64).unwrap_err();
        assert_eq!(err.code(), Z_DATA_ERROR);
    }

    #[test]
    fn bad_gzip_header() {
        let input = [0x1f, 0x8b, 0x09, 0x00, 0, 0, 0, 0, 0, 3];
        let err = inflate(&input, 10, 64).unwrap_err();
        assert_eq!(err.code(), Z_DATA_ERROR);
        assert!(err.message().contains("compression method"));
    }
}
