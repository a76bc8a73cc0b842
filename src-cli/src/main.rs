use clap::Parser;

use fanindex_lib::cli::Args;

fn main() {
    let args = Args::parse();

    if let Err(e) = fanindex_lib::run(args) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
