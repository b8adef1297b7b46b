use clap::Parser;

/// A concurrent byte-range file downloader.
///
/// Splits the target file into ranges fetched over parallel
/// connections and reassembles them into one output file, falling back
/// to a plain download when the server cannot serve ranges.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The URL of the file to download.
    #[arg(short, long)]
    pub url: String,

    /// Output file path. Defaults to a name derived from the URL.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Number of parallel connections.
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub connections: u32,

    /// Fetch attempts allowed per chunk before giving up.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub retry_limit: u32,

    /// Seconds a connect or a single read may stall before failing.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// An optional SHA-256 hash to verify file integrity after download.
    #[arg(long)]
    pub verify_sha256: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}
