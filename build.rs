//! Renders the `keysweep(1)` manual page into `OUT_DIR`.
//!
//! The page is built from the same clap definition the binary parses, so the
//! documented flags cannot drift from the real ones.

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_PAGE: &str = "keysweep.1";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    writeln!(io::stdout(), "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let man = Man::new(cli::Cli::command())
        .section("1")
        .manual("User Commands")
        .source(concat!("keysweep ", env!("CARGO_PKG_VERSION")));

    let mut page = BufWriter::new(File::create(out_dir.join(MAN_PAGE))?);
    man.render(&mut page)?;
    page.flush()?;
    Ok(())
}
