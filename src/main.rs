//! Command-line front end for backing up and restoring game saves.

use clap::{Parser, Subcommand};
use savestash_backup::error::ErrorKind;
use savestash_backup::naming::{game_id_prefix, is_game_archive};
use savestash_backup::wine::{to_portable_path, to_real_path};
use savestash_backup::{
    BackupOrchestrator, DownloadRequest, LudusaviGenerator, RegistryProfileResolver, UploadRequest,
};
use savestash_config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a configuration file (yaml, toml or json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up a game's saves to the configured provider
    Backup {
        shop: String,
        object_id: String,
        /// Wine prefix the game runs in
        #[arg(long)]
        wine_prefix: Option<PathBuf>,
        /// Free-form label stored with the backup
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        download_option_title: Option<String>,
    },
    /// Restore a stored backup into place
    Restore {
        shop: String,
        object_id: String,
        /// Archive name, as printed by `list`
        artifact: String,
        /// Wine prefix the game currently runs in
        #[arg(long)]
        wine_prefix: Option<PathBuf>,
    },
    /// List a game's backups, newest first
    List { shop: String, object_id: String },
    /// Delete a stored backup and its metadata
    Delete { shop: String, object_id: String, artifact: String },
    /// Translate a real path into its portable form
    Portable {
        path: String,
        #[arg(long)]
        wine_prefix: Option<String>,
    },
    /// Translate a portable path back into a real one
    Real {
        path: String,
        #[arg(long)]
        wine_prefix: Option<String>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Path translation needs neither configuration nor the generator.
    match &args.command {
        Command::Portable { path, wine_prefix } => {
            println!("{}", to_portable_path(path, wine_prefix.as_deref()));
            return ExitCode::SUCCESS;
        },
        Command::Real { path, wine_prefix } => {
            println!("{}", to_real_path(path, wine_prefix.as_deref()));
            return ExitCode::SUCCESS;
        },
        _ => {},
    }

    let config_file = args.config.clone().or_else(Config::default_file);
    let config = match Config::load(config_file.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:?}");
            return ExitCode::FAILURE;
        },
    };
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting savestash");

    match run(args.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %*err, "Command failed");
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(command: Command, config: &Config) -> savestash_backup::error::Result<()> {
    let generator = LudusaviGenerator::from_config(&config.generator)?;
    let orchestrator =
        BackupOrchestrator::new(&config.staging_dir, Arc::new(generator), Arc::new(RegistryProfileResolver));

    match command {
        Command::Backup { shop, object_id, wine_prefix, label, download_option_title } => {
            let request = UploadRequest { shop, object_id, wine_prefix, label, download_option_title };
            let artifact = orchestrator.upload(&config.provider, &request).await?;
            println!("{artifact}");
        },
        Command::Restore { shop, object_id, artifact, wine_prefix } => {
            let request = DownloadRequest { shop, object_id, artifact, wine_prefix };
            for path in orchestrator.download(&config.provider, &request).await? {
                println!("{}", path.display());
            }
        },
        Command::List { shop, object_id } => {
            for artifact in orchestrator.list(&config.provider, &shop, &object_id).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    artifact.id,
                    artifact.created_at,
                    artifact.size_bytes,
                    artifact.label.as_deref().unwrap_or("")
                );
            }
        },
        Command::Delete { shop, object_id, artifact } => {
            if !is_game_archive(&artifact, &game_id_prefix(&shop, &object_id)) {
                exn::bail!(ErrorKind::Configuration(format!("{artifact} is not a backup of {shop}-{object_id}")));
            }
            orchestrator.delete(&config.provider, &artifact).await?;
        },
        Command::Portable { .. } | Command::Real { .. } => {},
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_backup() {
        let args = Args::parse_from(["savestash", "backup", "steam", "42", "--label", "checkpoint"]);
        match args.command {
            Command::Backup { shop, object_id, label, wine_prefix, .. } => {
                assert_eq!(shop, "steam");
                assert_eq!(object_id, "42");
                assert_eq!(label.as_deref(), Some("checkpoint"));
                assert_eq!(wine_prefix, None);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_rejects_foreign_artifact() {
        let staging = tempfile::tempdir().unwrap();
        let config = Config {
            staging_dir: staging.path().to_path_buf(),
            generator: savestash_config::GeneratorConfig { binary: Some("ludusavi".into()), config_dir: None },
            ..Config::default()
        };
        let command = Command::Delete {
            shop: "steam".to_string(),
            object_id: "42".to_string(),
            artifact: "gog-42-1700000000000.tar".to_string(),
        };
        let err = run(command, &config).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
    }
}
