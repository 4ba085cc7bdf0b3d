use std::{sync::Arc, time::Instant};

use meilisearch_sdk::client::Client;
use tracing::warn;

use super::{
    config::Config,
    database::Store,
    search::{init_meilisearch, reindex_all},
};

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub search: Arc<Client>,
    pub started: Instant,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let store = Store::connect(&config.redis_url).await;
        let search = init_meilisearch(&config.meili_url, &config.meili_key).await;

        if let Err(e) = reindex_all(&search, &store).await {
            warn!("Startup reindex failed: {e}");
        }

        Arc::new(Self {
            config,
            store,
            search,
            started: Instant::now(),
        })
    }
}
