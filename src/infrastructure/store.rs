use crate::config::ServiceConfig;
use crate::services::store::EphemeralStore;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub async fn setup_store(config: &ServiceConfig) -> anyhow::Result<Arc<EphemeralStore>> {
    let store = EphemeralStore::open_dir(&config.upload_folder)
        .await
        .with_context(|| {
            format!(
                "failed to create upload folder {}",
                config.upload_folder.display()
            )
        })?;

    info!(
        "🗂️  Staging directory: {} (ttl={}s, sweep every {}s)",
        store.root().display(),
        config.cleanup_age_seconds,
        config.cleanup_interval_seconds
    );

    Ok(Arc::new(store))
}
