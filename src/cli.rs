use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "provider-bench")]
#[command(author, version, about = "Compare chat-completion throughput across LLM API providers", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    pub config: PathBuf,

    /// Run a single benchmark in the foreground, print the report and exit
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_once_flag() {
        let cli = Cli::parse_from(["provider-bench", "bench.toml", "--once"]);
        assert_eq!(cli.config, PathBuf::from("bench.toml"));
        assert!(cli.once);

        let cli = Cli::parse_from(["provider-bench", "bench.toml"]);
        assert!(!cli.once);
    }
}
