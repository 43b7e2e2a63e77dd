//! Command-line arguments of the recorder.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct RecorderArgs {
    /// Symbols to record, comma separated (e.g. AAPL,MSFT)
    #[arg(short, long, value_delimiter = ',', required = true)]
    symbols: Vec<String>,

    /// Path to a broker client configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the .tickdat files are written to
    #[arg(short, long, default_value = "./data")]
    output_dir: PathBuf,

    /// Seconds to wait for the gateway session
    #[arg(long, default_value_t = 60)]
    ready_timeout_secs: u64,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Seed of the simulated market
    #[arg(long)]
    seed: Option<u64>,
}

impl RecorderArgs {
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn config(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol_list() {
        let args =
            RecorderArgs::parse_from(["tick-recorder", "--symbols", "AAPL,MSFT", "--seed", "3"]);
        assert_eq!(args.symbols(), ["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(args.output_dir(), &PathBuf::from("./data"));
        assert_eq!(args.ready_timeout(), Duration::from_secs(60));
        assert_eq!(args.duration(), None);
        assert_eq!(args.seed(), Some(3));
    }

    #[test]
    fn test_symbols_are_required() {
        assert!(RecorderArgs::try_parse_from(["tick-recorder"]).is_err());
    }
}
