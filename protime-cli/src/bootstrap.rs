use anyhow::{Context, Result};
use protime_core::{
    adapters::outbound::{FileKeyValueStore, HttpTransport, LogNotifier},
    LocalTimerStore, SyncGateway, SystemClock, TimerSession,
};
use std::sync::Arc;

use crate::{config::ProtimeConfig, session_store::Credentials};

pub type Engine = TimerSession<FileKeyValueStore, HttpTransport, LogNotifier, SystemClock>;

/// Wire a timer session for the logged-in user against the configured API.
pub fn build_engine(config: &ProtimeConfig, credentials: Option<Credentials>) -> Result<Arc<Engine>> {
    let credentials =
        credentials.context("Not logged in. Run `protime login --user <id> --token <token>`")?;

    let data_dir = config.resolved_data_dir()?;
    let kv = FileKeyValueStore::for_user(&data_dir, &credentials.user_id);
    tracing::debug!(store = %kv.root().display(), api = %config.api_url, "building engine");

    let transport = HttpTransport::new(
        &config.api_url,
        Some(credentials.token),
        config.request_timeout(),
    )
    .with_context(|| format!("Invalid api_url {}", config.api_url))?;

    Ok(Arc::new(TimerSession::new(
        credentials.user_id,
        config.engine.clone(),
        LocalTimerStore::new(Arc::new(kv)),
        SyncGateway::new(Arc::new(transport)),
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
    )))
}
