use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "search-eval",
    version,
    about = "Hybrid search evaluation against an external retrieval backend"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Eval(EvalArgs),
    Query(QueryArgs),
    CheckConfig(CheckConfigArgs),
}

/// Overrides applied on top of the config file before validation.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    #[arg(long)]
    pub export_root: Option<PathBuf>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub run_timeout_secs: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub skip_rerank: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
    #[arg(long, default_value = "search_eval_config.yaml")]
    pub config: PathBuf,

    #[arg(long)]
    pub queries: PathBuf,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long, default_value = "search_eval_config.yaml")]
    pub config: PathBuf,

    #[arg(long)]
    pub query: String,

    #[arg(long, default_value_t = false)]
    pub skip_rerank: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    #[arg(long, default_value = "search_eval_config.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
