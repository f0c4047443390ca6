use std::{io::{BufRead, Write}, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use clap::Parser;
use skiff::{EvaluationContext, EvaluatorConfig, SkiffError, SkiffValue};
use tracing::{debug, info};


/// Evaluate Scheme programs, or read them interactively.
#[derive(Debug, Parser)]
#[command(name = "skiff", version)]
struct Args {
    /// Script files evaluated in order. Without any, an interactive session starts.
    files: Vec<PathBuf>,

    /// Load a file, then continue interactively.
    #[arg(short, long, value_name = "FILE")]
    load: Vec<PathBuf>,

    /// Print every result as a JSON value.
    #[arg(long)]
    json: bool,

    /// Bound on pending evaluation depth.
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,
}

fn report(index: &mut usize, result: Result<SkiffValue, SkiffError>, json: bool) -> Result<()> {
    match result {
        Ok(value) if json => println!("{}", serde_json::to_string(&value)?),
        Ok(value) => println!("${} = {}", index, value),
        Err(error) => eprintln!("error: {}", error),
    }
    *index += 1;
    Ok(())
}

fn load_file(context: &mut EvaluationContext, path: &Path, json: bool) -> Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!("Loading {}", path.display());

    let mut index = 0;
    for result in context.feed(&source) {
        match result {
            // scripts only show what they print, unless asked for every value
            Ok(value) if json => println!("{}", serde_json::to_string(&value)?),
            Ok(_) => {}
            Err(error) => eprintln!("{}: expression {}: {}", path.display(), index, error),
        }
        index += 1;
    }

    if context.is_pending() {
        eprintln!("{}: incomplete expression at end of file", path.display());
        context.reset_input();
    }
    Ok(())
}

fn repl(context: &mut EvaluationContext, json: bool) -> Result<()> {
    let stdin = std::io::stdin();
    let mut index = 0;

    loop {
        eprint!("{}", if context.is_pending() { "... " } else { "> " });
        std::io::stderr().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        for result in context.feed(&line) {
            report(&mut index, result, json)?;
        }
    }

    debug!(results = index, "end of input");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = EvaluatorConfig { max_depth: args.max_depth };
    let mut context = EvaluationContext::with_config(config, std::io::stdout());

    for path in args.load.iter().chain(&args.files) {
        load_file(&mut context, path, args.json)?;
    }

    if args.files.is_empty() {
        repl(&mut context, args.json)?;
    }

    Ok(())
}
