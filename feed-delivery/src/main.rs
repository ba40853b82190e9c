use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_delivery::stores::postgres::setup_schema;
use feed_delivery::{
    generate_preview, handle_feed_deleted, InMemoryArticleFieldStore, InMemoryDeliveryRecordStore,
    PgArticleFieldStore, PgDeliveryRecordStore, PipelineConfig, PreviewDependencies, PreviewInput,
};
use interfaces::{ArticleFieldStore, DeliveryRecordStore};
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "feed-delivery", about = "Inspect article delivery decisions for a feed")]
struct Args {
    /// Postgres connection string. Without one, empty in-memory stores are used.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Explain what delivery would do for the target articles in a JSON preview request.
    Preview {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        summary_only: bool,
    },
    /// Drop all dedup state stored for a feed.
    ClearFeed {
        #[arg(long)]
        feed_id: String,
    },
}

struct Stores {
    article_fields: Box<dyn ArticleFieldStore>,
    delivery_records: Box<dyn DeliveryRecordStore>,
}

async fn open_stores(config: &PipelineConfig, database_url: Option<&str>) -> Result<Stores> {
    match database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await.context("Failed to connect to database")?;
            setup_schema(&pool).await.context("Failed to set up schema")?;
            info!("Using PostgreSQL stores");
            Ok(Stores {
                article_fields: Box::new(PgArticleFieldStore::new(pool.clone(), config.hot_partition_age())),
                delivery_records: Box::new(PgDeliveryRecordStore::new(pool)),
            })
        }
        None => {
            warn!("No DATABASE_URL set, using empty in-memory stores");
            Ok(Stores {
                article_fields: Box::new(
                    InMemoryArticleFieldStore::new().with_hot_partition_age(config.hot_partition_age()),
                ),
                delivery_records: Box::new(InMemoryDeliveryRecordStore::new()),
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = PipelineConfig::from_env();
    tracing_subscriber::fmt().with_max_level(config.log_level).init();

    let args = Args::parse();
    let database_url = args.database_url.clone().or_else(|| config.database_url.clone());
    let stores = open_stores(&config, database_url.as_deref()).await?;

    match args.command {
        Command::Preview { input, summary_only } => {
            let raw = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let mut request: PreviewInput = serde_json::from_str(&raw).context("Invalid preview request")?;
            request.summary_only |= summary_only;

            let deps = PreviewDependencies {
                article_field_store: stores.article_fields.as_ref(),
                delivery_record_store: stores.delivery_records.as_ref(),
            };
            let response = generate_preview(&request, &deps).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::ClearFeed { feed_id } => {
            handle_feed_deleted(&feed_id, stores.article_fields.as_ref()).await?;
        }
    }

    Ok(())
}
