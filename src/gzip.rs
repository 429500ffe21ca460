#![forbid(unsafe_code)]

use std::io::{self, BufRead};

use anyhow::{ensure, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use crc::{Crc, Digest};
use log::*;

////////////////////////////////////////////////////////////////////////////////

pub const ID1: u8 = 0x1f;
pub const ID2: u8 = 0x8b;

const CM_DEFLATE: u8 = 8;

const FTEXT_OFFSET: u8 = 0;
const FHCRC_OFFSET: u8 = 1;
const FEXTRA_OFFSET: u8 = 2;
const FNAME_OFFSET: u8 = 3;
const FCOMMENT_OFFSET: u8 = 4;

pub const FOOTER_SIZE: usize = 8;

static CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemberHeader {
    pub compression_method: CompressionMethod,
    pub modification_time: u32,
    pub extra: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    pub extra_flags: u8,
    pub os: u8,
    pub has_crc: bool,
    pub is_text: bool,
}

impl MemberHeader {
    pub fn crc16(&self) -> u16 {
        let mut digest = CRC32.digest();

        digest.update(&[ID1, ID2, self.compression_method.into(), self.flags().0]);
        digest.update(&self.modification_time.to_le_bytes());
        digest.update(&[self.extra_flags, self.os]);

        if let Some(extra) = &self.extra {
            digest.update(&(extra.len() as u16).to_le_bytes());
            digest.update(extra);
        }

        if let Some(name) = &self.name {
            digest.update(name);
            digest.update(&[0]);
        }

        if let Some(comment) = &self.comment {
            digest.update(comment);
            digest.update(&[0]);
        }

        (digest.finalize() & 0xffff) as u16
    }

    pub fn flags(&self) -> MemberFlags {
        let mut flags = MemberFlags(0);
        flags.set_is_text(self.is_text);
        flags.set_has_crc(self.has_crc);
        flags.set_has_extra(self.extra.is_some());
        flags.set_has_name(self.name.is_some());
        flags.set_has_comment(self.comment.is_some());
        flags
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CompressionMethod {
    Deflate,
    Unknown(u8),
}

impl From<u8> for CompressionMethod {
    fn from(value: u8) -> Self {
        match value {
            CM_DEFLATE => Self::Deflate,
            x => Self::Unknown(x),
        }
    }
}

impl From<CompressionMethod> for u8 {
    fn from(method: CompressionMethod) -> u8 {
        match method {
            CompressionMethod::Deflate => CM_DEFLATE,
            CompressionMethod::Unknown(x) => x,
        }
    }
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Deflate
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberFlags(u8);

impl MemberFlags {
    fn bit(&self, n: u8) -> bool {
        (self.0 >> n) & 1 != 0
    }

    fn set_bit(&mut self, n: u8, value: bool) {
        if value {
            self.0 |= 1 << n;
        } else {
            self.0 &= !(1 << n);
        }
    }

    pub fn is_text(&self) -> bool {
        self.bit(FTEXT_OFFSET)
    }

    pub fn set_is_text(&mut self, value: bool) {
        self.set_bit(FTEXT_OFFSET, value)
    }

    pub fn has_crc(&self) -> bool {
        self.bit(FHCRC_OFFSET)
    }

    pub fn set_has_crc(&mut self, value: bool) {
        self.set_bit(FHCRC_OFFSET, value)
    }

    pub fn has_extra(&self) -> bool {
        self.bit(FEXTRA_OFFSET)
    }

    pub fn set_has_extra(&mut self, value: bool) {
        self.set_bit(FEXTRA_OFFSET, value)
    }

    pub fn has_name(&self) -> bool {
        self.bit(FNAME_OFFSET)
    }

    pub fn set_has_name(&mut self, value: bool) {
        self.set_bit(FNAME_OFFSET, value)
    }

    pub fn has_comment(&self) -> bool {
        self.bit(FCOMMENT_OFFSET)
    }

    pub fn set_has_comment(&mut self, value: bool) {
        self.set_bit(FCOMMENT_OFFSET, value)
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, PartialEq)]
pub struct MemberFooter {
    pub data_crc32: u32,
    pub data_size: u32,
}

impl MemberFooter {
    pub fn parse<T: BufRead>(footer: &mut T) -> Result<Self> {
        Ok(Self {
            data_crc32: footer.read_u32::<LittleEndian>()?,
            data_size: footer.read_u32::<LittleEndian>()?,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Running CRC32 and length of the decompressed member body.
pub struct MemberChecksum {
    digest: Digest<'static, u32>,
    byte_count: u64,
}

impl MemberChecksum {
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
            byte_count: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
        self.byte_count += data.len() as u64;
    }

    pub fn verify(self, footer: &MemberFooter) -> Result<()> {
        let actual_size = self.byte_count as u32;
        ensure!(footer.data_size == actual_size, "length check failed");
        ensure!(footer.data_crc32 == self.digest.finalize(), "crc32 check failed");
        Ok(())
    }
}

impl Default for MemberChecksum {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////

/// True when `err` only means the header is not complete in the bytes seen so far.
pub fn is_incomplete(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>()
        .map_or(false, |e| e.kind() == io::ErrorKind::UnexpectedEof)
}

pub fn parse_header<T: BufRead>(header: &mut T) -> Result<MemberHeader> {
    let id_1 = header.read_u8()?;
    ensure!(id_1 == ID1, "wrong id values");

    let id_2 = header.read_u8()?;
    ensure!(id_2 == ID2, "wrong id values");

    let mut pheader = MemberHeader {
        compression_method: header.read_u8()?.into(),
        ..Default::default()
    };
    debug!("CM:\t{:?}", pheader.compression_method);
    ensure!(
        pheader.compression_method == CompressionMethod::Deflate,
        "unsupported compression method"
    );

    let pflags = MemberFlags(header.read_u8()?);
    debug!("FLG:\t{:#010b}", pflags.0);
    ensure!(pflags.0 & 0xe0 == 0, "reserved flag bits set");

    pheader.modification_time = header.read_u32::<LittleEndian>()?;
    pheader.extra_flags = header.read_u8()?;
    pheader.os = header.read_u8()?;
    debug!("MTIME:\t{}", pheader.modification_time);
    debug!("XFL:\t{}", pheader.extra_flags);
    debug!("OS:\t{}", pheader.os);

    if pflags.has_extra() {
        let len: usize = header.read_u16::<LittleEndian>()?.into();
        let mut extra = vec![0; len];
        header.read_exact(&mut extra)?;
        debug!("EXTRA:\t{} bytes", extra.len());
        pheader.extra = Some(extra);
    }

    if pflags.has_name() {
        pheader.name = Some(read_zero_terminated(header)?);
        debug!("NAME:\t{:?}", pheader.name.as_deref().map(String::from_utf8_lossy));
    }

    if pflags.has_comment() {
        pheader.comment = Some(read_zero_terminated(header)?);
        debug!(
            "COMMENT:\t{:?}",
            pheader.comment.as_deref().map(String::from_utf8_lossy)
        );
    }

    pheader.is_text = pflags.is_text();

    if pflags.has_crc() {
        let crc = header.read_u16::<LittleEndian>()?;
        debug!("CRC:\t{:#06x}", crc);

        /* Caveat: must be set before calculating crc16 of header. */
        pheader.has_crc = true;
        ensure!(crc == pheader.crc16(), "header crc16 check failed");
    }

    Ok(pheader)
}

fn read_zero_terminated<T: BufRead>(header: &mut T) -> Result<Vec<u8>> {
    let mut field = vec![];
    header.read_until(0, &mut field)?;
    if field.pop() != Some(0) {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(field)
}

////////////////////////////////////////////////////////////////////////////////
