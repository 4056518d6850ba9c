use colored::Colorize;
use pipeline::{BuildArtifact, FlashReport, Observer, PipelineError, Stage};
use std::time::Duration;

/// Prints the stage banners while a pipeline runs.
#[derive(Debug, Default)]
pub struct Banner;

impl Observer for Banner {
    fn stage_started(&mut self, stage: Stage) {
        println!();
        match stage {
            Stage::Compile => println!("{}", "🔨 Building firmware...".cyan().bold()),
            Stage::Flash => {
                println!("{}", "📡 Flashing via debug adapter...".cyan().bold());
                println!("   {}", "Connecting to adapter...".dimmed());
            }
            Stage::Configuration => {}
        }
    }

    fn compiled(&mut self, artifact: &BuildArtifact, elapsed: Duration) {
        let note = if artifact.fresh { " (up to date)" } else { "" };
        println!(
            "{}",
            format!("✓ Build successful in {:.2}s{note}", elapsed.as_secs_f64()).green()
        );
        print_artifact(artifact);
    }

    fn flashed(&mut self, report: &FlashReport, elapsed: Duration) {
        println!(
            "{}",
            format!("✓ Flash successful in {:.2}s", elapsed.as_secs_f64()).green()
        );
        let states: Vec<&str> = report.history.iter().map(|s| s.name()).collect();
        println!("   {}", states.join(" → ").dimmed());
    }
}

pub fn print_artifact(artifact: &BuildArtifact) {
    println!("{}", "📊 Artifact:".cyan());
    println!("   {}", artifact.path.display().to_string().dimmed());
    println!("   {}", format!("{} bytes", artifact.size).dimmed());
    println!("   {}", format!("sha256 {}", artifact.digest).dimmed());
}

pub fn print_failure(error: &anyhow::Error) {
    eprintln!();
    match error.downcast_ref::<PipelineError>() {
        Some(failure) => {
            eprintln!(
                "{}",
                format!("✗ {} failed ({})", failure.stage().name(), failure.kind())
                    .red()
                    .bold()
            );
            eprintln!("   {failure}");
        }
        None => {
            eprintln!("{}", "✗ Failed".red().bold());
            eprintln!("   {error:#}");
        }
    }
    eprintln!();
}

pub fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<PipelineError>()
        .map_or(1, PipelineError::exit_code)
}
