use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tessera_client::{ClientError, Session, SessionOptions};
use tessera_tact::root::LocaleFlags;

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Extract files from a content distribution build",
    version
)]
struct Cli {
    /// Product to open
    #[arg(long, default_value = "wow")]
    product: String,

    /// Distribution region
    #[arg(long, default_value = "us")]
    region: String,

    /// Locale for root-manifest filtering
    #[arg(long, default_value = "enUS")]
    locale: String,

    /// Directory for downloaded and generated files
    #[arg(long = "cacheDirectory", default_value = "cache")]
    cache_directory: PathBuf,

    /// Local game installation to read before the network
    #[arg(long = "baseDirectory")]
    base_directory: Option<PathBuf>,

    /// Build configuration hash (discovered when omitted)
    #[arg(long = "buildConfig")]
    build_config: Option<String>,

    /// CDN configuration hash (discovered when omitted)
    #[arg(long = "cdnConfig")]
    cdn_config: Option<String>,

    /// File of chunk-encryption keys (`keyname keyhex` lines)
    #[arg(long = "keyFile")]
    key_file: Option<PathBuf>,

    /// Write the extracted file here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a file by its numeric file data ID
    #[command(name = "extractFileDataID")]
    ExtractFileDataId { fdid: u32 },

    /// Extract a file by its 16-byte content key (hex)
    #[command(name = "extractContentKey")]
    ExtractContentKey { ckey: String },

    /// Extract a blob by its 16-byte encoding key (hex)
    #[command(name = "extractEncodingKey")]
    ExtractEncodingKey { ekey: String },

    /// Extract a file by its path name
    #[command(name = "extractFileName")]
    ExtractFileName { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let locale = LocaleFlags::from_name(&cli.locale)
        .ok_or_else(|| ClientError::InvalidLocale(cli.locale.clone()))?;
    let region = cli.region.parse()?;

    let mut options = SessionOptions::new(cli.product, region, locale);
    options.cache_dir = cli.cache_directory;
    options.base_dir = cli.base_directory;
    options.build_config = cli.build_config;
    options.cdn_config = cli.cdn_config;
    options.key_file = cli.key_file;

    let session = Session::open(options).await?;

    let (what, bytes) = match &cli.command {
        Commands::ExtractFileDataId { fdid } => {
            (format!("file data ID {fdid}"), session.file_by_fdid(*fdid).await?)
        }
        Commands::ExtractContentKey { ckey } => {
            (format!("content key {ckey}"), session.file_by_ckey_hex(ckey).await?)
        }
        Commands::ExtractEncodingKey { ekey } => {
            (format!("encoding key {ekey}"), session.file_by_ekey(ekey).await?)
        }
        Commands::ExtractFileName { name } => {
            (format!("file {name:?}"), session.file_by_name(name).await?)
        }
    };

    let Some(bytes) = bytes else {
        eprintln!("error: {what} not found in this build");
        std::process::exit(1);
    };

    match &cli.output {
        Some(path) => {
            std::fs::write(path, &bytes)?;
            eprintln!("wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => std::io::stdout().write_all(&bytes)?,
    }

    Ok(())
}
