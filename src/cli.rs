use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "batchdl")]
#[command(about = "Plugin-driven batch downloader", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $BATCHDL_CONFIG or config/batchdl.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download everything a plugin yields for a URL
    Download(DownloadArgs),
    /// List available plugins and their options
    Plugins,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Source URL
    pub url: String,

    /// Maximum number of concurrent workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Use this plugin instead of matching on the URL
    #[arg(long)]
    pub plugin: Option<String>,

    /// Plugin option override, e.g. -O Username=mino
    #[arg(short = 'O', long = "option", value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty option name in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}
