use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use plo::{OutlineOptions, OutliningPass};

#[derive(Parser)]
#[command(name = "plo")]
#[command(about = "Post-link outlining pass over program listings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[arg(help = "Input program listing")]
        input: PathBuf,

        #[arg(short, long, help = "Output listing")]
        output: PathBuf,

        #[arg(
            short,
            long,
            help = "Option file with 'name = value' lines (enable-post-link-outlining, \
                    post-link-outlining-length, ...)"
        )]
        config: Option<PathBuf>,

        #[arg(long, help = "Disable the pass (overrides the option file)")]
        disable: bool,

        #[arg(long, help = "Maximum window length", value_name = "N")]
        length: Option<usize>,

        #[arg(long, help = "Minimum window length", value_name = "N")]
        min_length: Option<usize>,

        #[arg(long, help = "Enable profile-based filtering")]
        pgo: bool,

        #[arg(long, help = "Emit diagnostic tracing")]
        debug: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { input, output, config, disable, length, min_length, pgo, debug } => {
            let src = fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let mut program = plo::parse_program(&src)
                .with_context(|| format!("Failed to parse {}", input.display()))?;

            let mut opts = if let Some(config_path) = config {
                let flags = fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read {}", config_path.display()))?;
                OutlineOptions::from_flags(&flags)
                    .with_context(|| format!("Bad options in {}", config_path.display()))?
            } else {
                OutlineOptions::default()
            };
            if disable {
                opts.enabled = false;
            }
            if let Some(length) = length {
                opts.max_length = length;
            }
            if let Some(min_length) = min_length {
                opts.min_length = min_length;
            }
            opts.pgo |= pgo;
            opts.debug |= debug;

            let stats = OutliningPass::new(opts).run(&mut program).context("Pass failed")?;

            let listing = program.to_listing();
            fs::write(&output, &listing)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "{} -> {}: {} outlined, {} sites rewritten, {} wrappers inlined",
                input.display(),
                output.display(),
                stats.functions_synthesized,
                stats.call_sites_rewritten,
                stats.wrappers_inlined
            );
        }
    }

    Ok(())
}
