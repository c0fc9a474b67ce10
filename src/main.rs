use anthology::config::Config;
use anthology::pipeline::Generator;
use anthology::publish::{destination_path, DropboxCredentials, DropboxStore, LocalStore, ObjectStore};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use secrecy::SecretString;
use std::path::PathBuf;

const USER_AGENT: &str = concat!("anthology/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(
    name = "anthology",
    about = "Bundle recent feed articles into a dated EPUB"
)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Upload to Dropbox instead of writing to --out-dir
    #[arg(long)]
    upload: bool,

    /// Directory for locally written books
    #[arg(long, value_name = "DIR", default_value = "dist")]
    out_dir: PathBuf,

    /// Dropbox app key
    #[arg(long, env = "DROPBOX_APP_KEY")]
    dropbox_app_key: Option<String>,

    /// Dropbox app secret
    #[arg(long, env = "DROPBOX_APP_SECRET", hide_env_values = true)]
    dropbox_app_secret: Option<String>,

    /// Dropbox refresh token
    #[arg(long, env = "DROPBOX_REFRESH_TOKEN", hide_env_values = true)]
    dropbox_refresh_token: Option<String>,
}

/// Flags and environment variables win over the `[dropbox]` table.
fn dropbox_credentials(args: &Args, config: &Config) -> Result<DropboxCredentials> {
    fn pick(flag: &Option<String>, file: &Option<String>, name: &str, env: &str) -> Result<String> {
        flag.clone()
            .or_else(|| file.clone())
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("Missing Dropbox {name}: pass --dropbox-{}, set {env} or add it to [dropbox]", name.replace(' ', "-")))
    }

    let dropbox = &config.dropbox;
    Ok(DropboxCredentials {
        app_key: pick(&args.dropbox_app_key, &dropbox.app_key, "app key", "DROPBOX_APP_KEY")?,
        app_secret: SecretString::from(pick(
            &args.dropbox_app_secret,
            &dropbox.app_secret,
            "app secret",
            "DROPBOX_APP_SECRET",
        )?),
        refresh_token: SecretString::from(pick(
            &args.dropbox_refresh_token,
            &dropbox.refresh_token,
            "refresh token",
            "DROPBOX_REFRESH_TOKEN",
        )?),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let sources = config.sources().context("Invalid feed list")?;

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create HTTP client")?;

    // Resolve the destination before fetching so missing credentials fail fast.
    let store: Box<dyn ObjectStore> = if args.upload {
        Box::new(DropboxStore::new(
            client.clone(),
            dropbox_credentials(&args, &config)?,
        ))
    } else {
        Box::new(LocalStore::new(&args.out_dir))
    };

    let generator = Generator::from_config(&config, client);

    // Nothing is written until generation returns, so an interrupted run
    // leaves no output behind.
    let result = tokio::select! {
        result = generator.generate(&sources, Utc::now()) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, nothing written");
            std::process::exit(130);
        }
    };

    let generated = match result {
        Ok(Some(generated)) => generated,
        Ok(None) => {
            tracing::info!("No new articles, skipping");
            return Ok(());
        }
        Err(e) => {
            tracing::error!(stage = e.stage(), error = %e, "Generation failed");
            std::process::exit(1);
        }
    };

    tracing::info!(
        articles = generated.article_count,
        filename = %generated.filename,
        bytes = generated.bytes.len(),
        "Generated book"
    );

    let destination = if args.upload {
        destination_path(&config.output_folder, &generated.filename)
    } else {
        generated.filename.clone()
    };
    let stored = store
        .put(&destination, generated.bytes)
        .await
        .with_context(|| format!("Failed to store {}", generated.filename))?;

    tracing::info!(path = %stored, "Saved book");
    Ok(())
}
