use std::sync::Arc;

use anyhow::Context;

use levy_api::app::{build_app, services::spawn_overdue_sweep};
use levy_infra::{BillingConfig, BillingServices};

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    levy_observability::init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let bind = std::env::var("LEVY_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let config = BillingConfig::from_env().context("invalid billing configuration")?;
    tracing::info!(?config, "configuration loaded");

    let sweep_interval = config.overdue_sweep_interval;
    let billing = Arc::new(BillingServices::new(config));
    if let Some(interval) = sweep_interval {
        tracing::info!(interval_secs = interval.as_secs(), "scheduled overdue sweep enabled");
        spawn_overdue_sweep(billing.clone(), interval);
    }

    let app = build_app(jwt_secret, billing);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
