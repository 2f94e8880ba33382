//! # coin-fetch
//!
//! Command-line front end of `lib_coinfetch`: GET a market-data endpoint and
//! print the normalized envelope, download a file, or check the metadata
//! store for a table.
//!
//! Settings are layered: built-in defaults, the JSON file given with
//! `--config`, then `COINFETCH_*` environment variables and flags, where a
//! flag beats its variable. A `.env` file is read first.
//!
//! ```bash
//! coin-fetch get https://api.coingecko.com/api/v3/simple/price \
//!     -p ids=bitcoin,litecoin -p vs_currencies=usd --output-csv coingecko --suffix _usd
//! coin-fetch download https://assets.example.com/btc.png --output btc.png
//! coin-fetch table-exists coinCoingecko --database-url sqlite://coins.db
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use lib_coinfetch::connections::db_store::Database;
use lib_coinfetch::exports::tabular::{Table, write_csv};
use lib_coinfetch::loggers::logger_setup::{LogOptions, init_logging};
use lib_coinfetch::{AppConfig, ConfigArgs, ParamValue, RequestClient, build_url_with_params};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const APP_NAME: &str = "coin-fetch";

#[derive(Parser, Debug)]
#[command(
    name = APP_NAME,
    version,
    about = "Fetch market data through a rate-limit aware HTTP client.",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    settings: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// GET a JSON endpoint and print the normalized response.
    Get {
        /// Endpoint URL.
        url: String,

        /// Query parameter as key=value; `true`/`false` are booleans, anything else is sent as typed.
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,

        /// The URL already carries a query string.
        #[arg(long)]
        has_query: bool,

        /// Extra header as name:value.
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Also write the response as CSV under this base file name.
        #[arg(long)]
        output_csv: Option<String>,

        /// Appended to the CSV file name; `:;,!@#$%^&*()` are removed.
        #[arg(long, default_value = "")]
        suffix: String,
    },

    /// Download a file as-is.
    Download {
        /// File URL.
        url: String,

        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Report whether a table exists in the metadata store.
    TableExists {
        /// Table name.
        name: String,
    },
}

fn parse_param(raw: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = value.parse::<ParamValue>().map_err(|e| e.to_string())?;
    Ok((key.to_string(), value))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected name:value, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so clap sees the .env values
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.settings).context("Failed to load configuration")?;

    let log_options = LogOptions {
        level: config.log_level.clone(),
        log_dir: config.log_dir.clone(),
        ..LogOptions::default()
    };
    let _guard = init_logging(APP_NAME, &log_options).context("Failed to initialise logging")?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Get {
            url,
            params,
            has_query,
            headers,
            output_csv,
            suffix,
        } => {
            let mut client = config.client.build_client().context("Failed to build HTTP client")?;
            client
                .set_default_headers(headers)
                .context("Invalid --header value")?;

            let url = build_url_with_params(&url, params, has_query);
            run_get(&client, &url, output_csv, &suffix, &config.output_path).await
        }
        Commands::Download { url, output } => {
            let client = config.client.build_client().context("Failed to build HTTP client")?;
            run_download(&client, &url, &output).await
        }
        Commands::TableExists { name } => {
            let database_url = config
                .database_url
                .ok_or_else(|| anyhow!("No database URL: pass --database-url or set DATABASE_URL"))?;
            run_table_exists(&database_url, &name).await
        }
    }
}

async fn run_get(
    client: &RequestClient,
    url: &str,
    output_csv: Option<String>,
    suffix: &str,
    output_dir: &Path,
) -> Result<()> {
    let envelope = client
        .fetch_json(url)
        .await
        .with_context(|| format!("GET {url} failed"))?;

    let rendered = serde_json::to_string_pretty(&envelope.to_value())?;
    println!("{rendered}");

    if let Some(base_name) = output_csv {
        let table = Table::from_envelope(&envelope);
        let path = write_csv(&table, output_dir, &base_name, suffix)?;
        println!("File written: {}", path.display());
    }
    Ok(())
}

async fn run_download(client: &RequestClient, url: &str, output: &Path) -> Result<()> {
    let mut response = client
        .download(url)
        .await
        .with_context(|| format!("Download of {url} failed"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("Download of {url} failed with HTTP {status}");
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut written: u64 = 0;
    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("Failed to read body of {url}"))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    info!(path = %output.display(), bytes = written, "File written");
    println!("File written: {} ({written} bytes)", output.display());
    Ok(())
}

async fn run_table_exists(database_url: &str, name: &str) -> Result<()> {
    let mut db = Database::connect(database_url).await?;
    let exists = db.table_exists(name).await?;
    db.close().await?;

    if exists {
        println!("\"{name}\" table exists");
    } else {
        println!("\"{name}\" table does not exist");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn get_collects_params_and_headers() {
        let cli = Cli::try_parse_from([
            "coin-fetch",
            "--log-level",
            "debug",
            "get",
            "https://api.example.com/simple/price",
            "-p",
            "ids=bitcoin,litecoin",
            "-p",
            "include_market_cap=true",
            "-H",
            "X-API-Key: secret",
            "--output-csv",
            "prices",
            "--suffix",
            "_2022-05-01T23:00",
        ])
        .unwrap();

        assert_eq!(cli.settings.log_level.as_deref(), Some("debug"));
        let Commands::Get { params, headers, output_csv, suffix, has_query, .. } = cli.command else {
            panic!("expected get");
        };
        assert_eq!(
            params,
            vec![
                ("ids".to_string(), ParamValue::Str("bitcoin,litecoin".into())),
                ("include_market_cap".to_string(), ParamValue::Bool(true)),
            ]
        );
        assert_eq!(headers, vec![("X-API-Key".to_string(), "secret".to_string())]);
        assert_eq!(output_csv.as_deref(), Some("prices"));
        assert_eq!(suffix, "_2022-05-01T23:00");
        assert!(!has_query);
    }

    #[test]
    fn malformed_param_and_header_are_rejected() {
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
        assert!(parse_header("no-colon").is_err());
        assert_eq!(parse_param("days=030").unwrap().1, ParamValue::Str("030".into()));
    }

    #[test]
    fn download_requires_an_output() {
        assert!(Cli::try_parse_from(["coin-fetch", "download", "https://example.com/a.png"]).is_err());
    }
}
