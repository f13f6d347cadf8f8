use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hound_search::{CancelToken, Config, QueryEngine, SearchRequest, SearcherRegistry};

#[derive(Parser, Debug)]
#[command(name = "hound-query", about = "Index all configured repos and run one query")]
struct Args {
    /// Regex pattern to search for
    pattern: String,
    /// Configuration file
    #[arg(long, default_value = "config.json")]
    conf: std::path::PathBuf,
    /// Case-insensitive matching
    #[arg(short = 'i', long)]
    ignore_case: bool,
    /// Restrict to file paths matching this regex
    #[arg(long)]
    files: Option<String>,
    /// Lines of context around each match
    #[arg(long, default_value_t = 0)]
    context: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cfg = Config::load(&args.conf)?;
    let (registry, errors) = SearcherRegistry::make_all(&cfg).await?;
    for (repo, err) in &errors {
        eprintln!("warning: {}: {}", repo, err);
    }
    let registry = Arc::new(registry);
    let engine = QueryEngine::new(registry.clone(), cfg.result_limit);

    let req = SearchRequest {
        pattern: args.pattern.clone(),
        files: args.files.clone(),
        ignore_case: args.ignore_case,
        context_lines: args.context,
        ..Default::default()
    };
    let resp = engine.search(&req, &CancelToken::new(), None).await?;
    for (repo, result) in &resp.results {
        if let Some(err) = &result.error {
            eprintln!("{}: {}", repo, err);
            continue;
        }
        for file in &result.files {
            for m in &file.matches {
                println!("{}:{}:{}: {}", repo, file.path, m.line_number, m.line);
            }
        }
    }
    if resp.truncated {
        eprintln!("(results truncated)");
    }
    registry.stop_all().await;
    Ok(())
}
