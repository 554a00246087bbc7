use std::time::Duration;

use aws_config::{BehaviorVersion, Region, SdkConfig, meta::region::RegionProviderChain, timeout::TimeoutConfig};

/// Loads an SDK config pinned to `region` with uniform 30s timeouts.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    let region_provider = RegionProviderChain::first_try(Region::new(region.to_owned()));

    aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(Duration::from_secs(30))
                .operation_timeout(Duration::from_secs(30))
                .operation_attempt_timeout(Duration::from_secs(30))
                .read_timeout(Duration::from_secs(30))
                .build(),
        )
        .load()
        .await
}
