use std::{path::Path, sync::Arc};

use {
    anyhow::Result,
    clap::Subcommand,
    courier_auth::{CredentialPool, CredentialStatus, JsonFileStore},
    courier_common::{Clock, SystemClock},
    courier_config::{CourierConfig, cooldown_store_path},
    tracing::debug,
};

#[derive(Subcommand)]
pub enum CredentialsAction {
    /// Show every configured key (by suffix) with its failure and cooldown state.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_credentials(action: CredentialsAction, config_path: Option<&Path>) -> Result<()> {
    let config = crate::load_config(config_path)?;
    match action {
        CredentialsAction::Status { json } => {
            let pool = build_pool(&config).await;
            let status = pool.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_table(&status, SystemClock.now_ms());
            }
            Ok(())
        },
    }
}

/// Pool over every enabled provider's keys, with cooldowns persisted in the
/// configured store so they survive restarts.
pub async fn build_pool(config: &CourierConfig) -> Arc<CredentialPool> {
    let store_path = cooldown_store_path(&config.credentials);
    debug!(path = %store_path.display(), "credential cooldown store");
    let pool = Arc::new(CredentialPool::new(
        Arc::new(JsonFileStore::new(store_path)),
        Arc::new(SystemClock),
    ));

    let mut providers: Vec<_> = config
        .providers
        .iter()
        .filter(|(_, entry)| entry.enabled)
        .collect();
    providers.sort_by(|a, b| a.0.cmp(b.0));
    for (provider, entry) in providers {
        for key in entry.keys() {
            pool.add_credential(provider, key).await;
        }
    }
    pool
}

fn print_table(status: &[CredentialStatus], now_ms: i64) {
    if status.is_empty() {
        println!("No credentials configured.");
        return;
    }
    println!(
        "{:<14} {:<10} {:>8}  {:<18} {}",
        "PROVIDER", "KEY", "FAILURES", "STATE", "LAST REASON"
    );
    for cred in status {
        let state = if cred.available {
            "ok".to_string()
        } else {
            format!("cooldown {}s", (cred.backoff_until_ms - now_ms).max(0) / 1000)
        };
        let reason = cred.last_reason.map_or("-", |r| r.as_str());
        println!(
            "{:<14} ...{:<7} {:>8}  {:<18} {}",
            cred.provider, cred.suffix, cred.failures, state, reason
        );
    }
}
