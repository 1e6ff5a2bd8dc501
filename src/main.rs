mod acquisition;
mod console;
mod domain;
mod infrastructure;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    console::run(console::Opts::parse())
}
