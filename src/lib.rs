#![forbid(unsafe_code)]

use std::io::{self, Read, Write};

mod buffer;
mod error;
mod gzip;
mod inflate;
mod reader;
mod strict_file;

pub use crate::buffer::{is_compressed_signature, Config, DecodeBuffer, Mode, DEFAULT_BUFFER_SIZE};
pub use crate::error::{
    DecodeError, Error, Result, Z_BUF_ERROR, Z_DATA_ERROR, Z_MEM_ERROR, Z_NEED_DICT,
    Z_STREAM_ERROR, Z_VERSION_ERROR,
};
pub use crate::inflate::{Feed, Inflater, Status};
pub use crate::reader::ZReader;
pub use crate::strict_file::{OpenMode, StrictFile};

/// Copy `input` to `output`, inflating it first if it is gzip or zlib data.
pub fn decompress<R: Read, W: Write>(input: R, mut output: W, config: Config) -> io::Result<u64> {
    let mut reader = ZReader::with_config(input, config);
    let copied = io::copy(&mut reader, &mut output)?;
    output.flush()?;
    Ok(copied)
}
