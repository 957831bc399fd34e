use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "faasmesh")]
#[command(about = "Delegate serverless invocations between cooperating clusters")]
#[command(version)]
pub struct Args {
    /// Path to the configuration file (YAML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Path to a .env file for loading credentials
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Override the cluster id from the configuration file
    #[arg(long, value_name = "ID")]
    pub cluster_id: Option<String>,

    /// Override the services namespace from the configuration file
    #[arg(long, value_name = "NAMESPACE")]
    pub namespace: Option<String>,
}
