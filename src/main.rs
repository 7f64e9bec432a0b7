//! Honya CLI - serve the aggregation API or query a provider directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use honya::api::{self, AppState};
use honya::config::Config;
use honya::{
    EpisodeStore, Ingestor, MemoryEpisodeStore, MemoryMetadataStore, MetadataStore, Network,
    NovelService, ProviderRegistry, RankOptions, ReadThroughEpisodes, ReadThroughMetadata,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Web novel aggregation service.
#[derive(Parser, Debug)]
#[command(name = "honya")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server.
    Serve {
        /// Address to listen on, overriding the config file.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Fetch a novel's metadata, or one chapter, and print it as JSON.
    Fetch {
        provider: String,
        novel_id: String,

        /// Fetch this chapter instead of the metadata.
        #[arg(long)]
        chapter: Option<String>,
    },

    /// Fetch a provider ranking and print it as JSON.
    Rank {
        provider: String,

        /// Rank options as key=value pairs, forwarded to the provider.
        #[arg(value_parser = parse_option)]
        options: Vec<(String, String)>,
    },
}

fn parse_option(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Command::Serve { bind: Some(bind) } = &args.command {
        config.server.bind = bind.clone();
    }
    config.validate().context("Invalid configuration")?;

    let network = Network::new(&config.network).context("Failed to build HTTP client")?;
    let registry = ProviderRegistry::with_builtin(&network, config.network.isolate_sessions)
        .context("Failed to set up providers")?;

    match args.command {
        Command::Serve { .. } => serve(config, registry).await,
        Command::Fetch {
            provider,
            novel_id,
            chapter,
        } => {
            let provider = registry.get(&provider)?;
            let json = match chapter {
                Some(chapter_id) => serde_json::to_string_pretty(
                    &provider
                        .fetch_chapter(&novel_id, &chapter_id)
                        .await
                        .context("Failed to fetch chapter")?,
                )?,
                None => serde_json::to_string_pretty(
                    &provider
                        .fetch_metadata(&novel_id)
                        .await
                        .context("Failed to fetch metadata")?,
                )?,
            };
            println!("{}", json);
            Ok(())
        }
        Command::Rank { provider, options } => {
            let options: RankOptions = options.into_iter().collect();
            let listings = registry
                .get(&provider)?
                .rank(&options)
                .await
                .context("Failed to fetch ranking")?;
            println!("{}", serde_json::to_string_pretty(&listings)?);
            Ok(())
        }
    }
}

async fn serve(config: Config, registry: ProviderRegistry) -> Result<()> {
    let registry = Arc::new(registry);
    let memory_metadata: Arc<dyn MetadataStore> =
        Arc::new(MemoryMetadataStore::new(Arc::clone(&registry)));
    let memory_episodes: Arc<dyn EpisodeStore> = Arc::new(MemoryEpisodeStore::new());

    let (metadata, episodes) = if config.ingest.read_through {
        let ingestor = Ingestor::new(
            Arc::clone(&registry),
            Arc::clone(&memory_metadata),
            Arc::clone(&memory_episodes),
        );
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(ReadThroughMetadata::new(memory_metadata, ingestor.clone()));
        let episodes: Arc<dyn EpisodeStore> =
            Arc::new(ReadThroughEpisodes::new(memory_episodes, ingestor));
        (metadata, episodes)
    } else {
        (memory_metadata, memory_episodes)
    };

    tracing::info!(
        providers = ?registry.ids(),
        read_through = config.ingest.read_through,
        "Starting server"
    );

    let state = AppState {
        service: Arc::new(NovelService::new(metadata, episodes)),
        page_size: config.server.page_size,
        rank_max_age_sec: config.server.rank_max_age_sec,
    };
    api::serve(config.bind_addr()?, state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("type=weekly").unwrap(),
            ("type".to_string(), "weekly".to_string())
        );
        assert_eq!(
            parse_option("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_option("weekly").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from(["honya", "rank", "syosetu", "order=weekly"]).unwrap();
        assert!(matches!(args.command, Command::Rank { ref options, .. } if options.len() == 1));

        let args = Args::try_parse_from([
            "honya", "fetch", "pixiv", "s123", "--chapter", "456", "--config", "x.toml",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(args.command, Command::Fetch { chapter: Some(_), .. }));
    }
}
