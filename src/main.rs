use std::env::args_os;

use clap::Parser;
use eyre::Result;
use mapping_dse::{args::Args, run_main};
fn main() -> Result<()> {
    let args = args_os();
    let args = Args::parse_from(args);
    run_main::main(args)
}
