use anyhow::Result;
use blockscan::options::Options;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse();
    let subcommand = options.subcommand.clone();
    subcommand.run(&options)
}
