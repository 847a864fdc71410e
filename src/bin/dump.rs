use std::io;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use wal_archive::dump_writer;
use wal_archive::Config;
use wal_archive::Dump;

#[derive(Clone, Debug, PartialEq, Eq, clap::Parser)]
#[clap(about = "dump WAL segments, archived and active", author)]
pub struct Args {
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Only print segment files that fail to read to the end.
    #[arg(long)]
    errors_only: bool,
}

fn main() -> Result<(), io::Error> {
    let args = Args::parse();

    let dir = args.path.to_str().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path is not valid UTF-8: {:?}", args.path),
        )
    })?;

    let dump = Dump::new(Arc::new(Config::new(dir)));

    if args.errors_only {
        dump.write_with(stdout(), |w, _i, res| match res {
            Ok(_) => Ok(()),
            Err(e) => dump_writer::multiline_string(w, 0, Err(e)),
        })
    } else {
        dump.write(stdout())
    }
}
