//! # bgpd
//!
//! Passive BGP-4 speaker recording peer sessions to rotated dump files.
//!
//! Run the daemon with a config file:
//! ```sh
//! $ bgpd run ./conf/bgpd.toml -vv
//! ```
//! Sending SIGHUP to the daemon reloads the config file.
//!
//! Decode a recording:
//! ```sh
//! $ bgpd decode -m ./var/dump/192.0.2.2/20231114221400
//! 1700000040|P|192.0.2.2|65001
//! 1700000041|A|10.1.0.0|16|O|I|AP|65001 65002
//! 1700000099|E
//! ```
//! - `-m` machine readable `timestamp|type|...` lines
//! - `-H` human readable lines
//! - `-j` one JSON object per line

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::dump::{DumpError, DumpReader};

mod display;

pub use display::OutputFormat;

#[derive(Parser, Debug)]
#[clap(name = "bgpd", rename_all = "kebab-case")]
/// Passive BGP speaker and session recorder
pub struct Args {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Show debug logs (additive for trace logs)
    #[clap(short, parse(from_occurrences), global = true)]
    pub verbose: u8,
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Run BGPd daemon
    Run(RunOptions),
    /// Print the records of a dump file
    #[clap(alias = "d")]
    Decode(DecodeOptions),
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub struct RunOptions {
    /// Path to BGP service config.toml
    pub config_path: PathBuf,
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
#[clap(group(ArgGroup::new("format").required(true).args(&["machine", "human", "json"])))]
pub struct DecodeOptions {
    /// Machine readable output, `timestamp|type|...`
    #[clap(short)]
    pub machine: bool,
    /// Human readable output
    #[clap(short = 'H')]
    pub human: bool,
    /// JSON output, one object per line
    #[clap(short)]
    pub json: bool,
    /// Dump file to read
    pub path: PathBuf,
}

impl DecodeOptions {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.human {
            OutputFormat::Human
        } else {
            OutputFormat::Machine
        }
    }
}

/// Print every record of a recording, stopping at the first malformed one
pub fn decode(options: &DecodeOptions) -> Result<(), DumpError> {
    let reader = DumpReader::open(&options.path)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let result = write_records(reader, options.format(), &mut out);
    out.flush()?;
    result
}

fn write_records<I, W>(records: I, format: OutputFormat, out: &mut W) -> Result<(), DumpError>
where
    I: IntoIterator<Item = Result<crate::dump::DumpRecord, DumpError>>,
    W: Write,
{
    for record in records {
        writeln!(out, "{}", format.render(&record?))?;
    }
    Ok(())
}
