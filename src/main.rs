mod api;
mod app;
mod config;
mod models;
mod services;

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use api::{ApiClient, ConsoleNotifier, LogNotifier, Notifier};
use app::App;
use config::Config;
use services::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    tracing::debug!("Loaded configuration: {:?}", config);

    let store = Store::open(&Config::data_path()).await?;
    let user_id = match config.user_id.clone().filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => store.user_id().await?,
    };

    let notifier: Arc<dyn Notifier> = if std::io::stderr().is_terminal() {
        Arc::new(ConsoleNotifier)
    } else {
        Arc::new(LogNotifier)
    };
    let client = ApiClient::new(&config, notifier)?.with_user_id(user_id);

    let mut app = App::new(config, store, client);
    app.run().await
}
