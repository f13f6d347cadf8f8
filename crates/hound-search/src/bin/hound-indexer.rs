use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hound_search::searcher::write_current_pointer;

#[derive(Parser, Debug)]
#[command(name = "hound-indexer", about = "Build one index generation from a working copy")]
struct Args {
    /// Path to the working copy to index
    repo: std::path::PathBuf,
    /// Database directory holding per-repo index directories
    #[arg(long)]
    db: std::path::PathBuf,
    /// Repo name under the database directory (defaults to the directory
    /// basename)
    #[arg(long)]
    name: Option<String>,
    /// Revision label recorded in the generation directory name
    #[arg(long, default_value = "work")]
    revision: String,
    /// Maximum file size in bytes to index
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    max_file_size: u64,
    /// Skip files and directories whose name starts with a dot
    #[arg(long)]
    exclude_dot_files: bool,
    /// Glob patterns (* and ? only) for auto-generated files to skip
    #[arg(long = "exclude")]
    excludes: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let name = match &args.name {
        Some(n) => n.clone(),
        None => args
            .repo
            .canonicalize()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string()),
    };
    let repo_dir = args.db.join(&name);
    let opts = hound_index::IndexOptions {
        max_file_size: args.max_file_size,
        exclude_dot_files: args.exclude_dot_files,
        auto_generated_files: args.excludes.clone(),
    };
    let cancel = std::sync::atomic::AtomicBool::new(false);
    let reader = hound_index::build_index(&args.repo, &args.revision, &repo_dir, 1, &opts, &cancel)?;
    write_current_pointer(&repo_dir, reader.dir())?;
    println!(
        "committed {} ({} files, {} trigrams)",
        reader.dir().display(),
        reader.file_count(),
        reader.trigram_count()
    );
    Ok(())
}
