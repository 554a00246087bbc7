use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use rdscheck::client_cache::ClientCache;
use rdscheck::config::Doc;
use rdscheck::copy::CopyStage;
use rdscheck::metrics::DatadogSink;
use rdscheck::store::{ConfigStore, S3ConfigStore};
use rdscheck_core::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env()?;
    let doc = load_doc(&settings).await?;

    let cache = ClientCache::new();
    let metrics = Arc::new(DatadogSink::new(&settings.datadog_api_key, &settings.datadog_app_key));
    let source = cache.get_or_init(&settings.source_region).await?;

    for instance in &doc.instances {
        let destination = cache.get_or_init(instance.destination()).await?;

        let stage = CopyStage::new(
            source.clone(),
            destination.clone(),
            destination.clone(),
            metrics.clone(),
            settings.source_region.clone(),
        );

        stage
            .run_target(instance)
            .await
            .with_context(|| format!("could not copy the snapshots of {}", instance.name))?;
    }

    Ok(())
}

async fn load_doc(settings: &Settings) -> anyhow::Result<Doc> {
    let config = rdscheck_core::client::load_sdk_config(&settings.source_region).await;
    let store = S3ConfigStore::new(aws_sdk_s3::Client::new(&config));

    let bytes = store
        .fetch(&settings.s3_bucket, &settings.s3_key)
        .await
        .context("could not get the config document from s3")?;

    Ok(Doc::parse(&bytes, &settings.source_region, settings.default_retention)?)
}
