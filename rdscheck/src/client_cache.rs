use std::{collections::HashMap, sync::Arc};

use anyhow::bail;
use tokio::sync::Mutex;

use crate::adapter::RdsAdapter;

/// Hands out one region-bound [`RdsAdapter`] per region, building the
/// underlying client on first use.
#[derive(Default)]
pub struct ClientCache {
    cache: Mutex<HashMap<String, Arc<RdsAdapter>>>,
}

impl ClientCache {
    pub fn new() -> ClientCache {
        ClientCache::default()
    }

    pub async fn get_or_init(&self, region: &str) -> anyhow::Result<Arc<RdsAdapter>> {
        let mut cache = self.cache.lock().await;

        if !cache.contains_key(region) {
            let config = rdscheck_core::client::load_sdk_config(region).await;
            let client = aws_sdk_rds::Client::new(&config);
            cache.insert(region.to_string(), Arc::new(RdsAdapter::new(Arc::new(client), region)));
        }

        let Some(adapter) = cache.get(region) else {
            bail!("Failed to get client for region {}", region);
        };

        Ok(adapter.clone())
    }
}
