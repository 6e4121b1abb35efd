#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

/// Decompress gzip files.
#[derive(StructOpt)]
#[structopt(name = "gzdec")]
struct Opt {
    /// Input file; reads standard input when omitted.
    input: Option<PathBuf>,

    /// Output file; writes standard output when omitted.
    #[structopt(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let stdin = io::stdin();
    let input: Box<dyn BufRead> = match &opt.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(stdin.lock()),
    };

    let stdout = io::stdout();
    let mut output: Box<dyn Write> = match &opt.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(stdout.lock()),
    };

    gzdec::decompress(input, &mut output)?;
    output.flush()?;

    Ok(())
}
