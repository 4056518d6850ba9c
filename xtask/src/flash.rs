use anyhow::Result;
use colored::Colorize;
use pipeline::{Cargo, OpenOcd, Pipeline};
use std::time::Instant;

use crate::args::{pipeline_config, AdapterArgs, BuildArgs};
use crate::report::Banner;

pub fn run(build: &BuildArgs, adapter: &AdapterArgs, dry_run: bool) -> Result<()> {
    let config = pipeline_config(build, adapter)?;
    tracing::debug!(?config, "resolved deploy configuration");
    let pipeline = Pipeline::new(Cargo::from_env(), OpenOcd);

    if dry_run {
        let plan = pipeline.plan(&config);
        println!();
        println!("{}", "📝 Deploy plan (nothing will run)".cyan().bold());
        println!("   {} {}", "build:".bold(), plan.build.join(" "));
        println!("   {} {}", "image:".bold(), plan.artifact.display());
        println!("   {} {}", "flash:".bold(), shell_words(&plan.flash));
        println!();
        return Ok(());
    }

    let start = Instant::now();
    let deployment = pipeline.run_observed(&config, &mut Banner)?;

    println!();
    println!(
        "{}",
        format!(
            "🚀 {} is running on the target ({:.2}s total)",
            deployment.artifact.project,
            start.elapsed().as_secs_f64()
        )
        .bold()
    );
    println!();

    Ok(())
}

/// Join arguments for display, quoting the ones with spaces.
fn shell_words(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(char::is_whitespace) {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
