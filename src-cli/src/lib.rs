pub mod cli;
pub mod input;

use anyhow::Context;

use cli::Args;

pub fn init_logging(directives: &[&str]) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {:?}: {}", directive, e),
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the `fanindex` binary.
pub fn run(args: Args) -> anyhow::Result<()> {
    init_logging(&["fanindex_lib=info", "fanindex_core=info", "milli=warn"]);

    let config = args.load_config()?;
    tracing::debug!(?config, "Loaded configuration");

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(cli::execute(config, args.command))
}
