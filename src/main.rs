#![forbid(unsafe_code)]

use std::io::{self, BufRead, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use structopt::StructOpt;

use zstream::{Config, OpenMode, StrictFile, ZReader};

#[derive(StructOpt, Debug)]
#[structopt(about = "Print files, inflating the gzip or zlib compressed ones")]
struct Opts {
    /// Verbose mode (-v, -vv, -vvv, etc)
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: usize,

    /// Size of each internal buffer, in bytes
    #[structopt(short = "b", long = "buffer-size", default_value = "1048576")]
    buffer_size: usize,

    /// Inflate every input, without checking for a compressed header first
    #[structopt(long = "no-auto-detect")]
    no_auto_detect: bool,

    /// Copy line by line, normalizing line endings to '\n'
    #[structopt(short = "l", long = "lines")]
    lines: bool,

    /// Write to this file instead of stdout
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,

    /// Input files; stdin when none are given
    #[structopt(parse(from_os_str))]
    inputs: Vec<PathBuf>,
}

fn copy<R: Read, W: Write>(mut reader: ZReader<R>, output: &mut W, lines: bool) -> io::Result<()> {
    if lines {
        for line in reader.lines() {
            writeln!(output, "{}", line?)?;
        }
    } else {
        io::copy(&mut reader, output)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::from_args();
    stderrlog::new().verbosity(opts.verbose).init()?;

    let config = Config::default()
        .with_buffer_size(opts.buffer_size)
        .with_auto_detect(!opts.no_auto_detect);
    debug!("{:?}", config);

    let mut output: Box<dyn Write> = match &opts.output {
        Some(path) => Box::new(BufWriter::new(StrictFile::open_or_exit(
            path,
            OpenMode::WRITE | OpenMode::BINARY,
        ))),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    if opts.inputs.is_empty() {
        info!("reading stdin");
        let stdin = io::stdin();
        let mut source = stdin.lock();
        copy(ZReader::with_config(&mut source, config), &mut output, opts.lines)
            .context("failed to decompress stdin")?;
    }

    for path in &opts.inputs {
        let reader = ZReader::open_with_config(path, config)?;
        copy(reader, &mut output, opts.lines)
            .with_context(|| format!("failed to decompress {}", path.display()))?;
    }

    output.flush().context("failed to flush output")?;
    Ok(())
}
