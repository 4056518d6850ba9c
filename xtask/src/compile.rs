use anyhow::Result;
use colored::Colorize;
use pipeline::{Cargo, OpenOcd, Pipeline};

use crate::args::BuildArgs;
use crate::report::Banner;

pub fn run(build: &BuildArgs) -> Result<()> {
    let config = build.to_config()?;
    tracing::debug!(?config, "resolved build configuration");
    let pipeline = Pipeline::new(Cargo::from_env(), OpenOcd);

    pipeline.build_only(&config, &mut Banner)?;

    println!();
    println!("{}", "Nothing flashed; run `cargo xtask flash` to deploy.".dimmed());
    println!();
    Ok(())
}
