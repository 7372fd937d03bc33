// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve` command implementation.
//!
//! Wires the configured driver factory, media cache, memory guardian,
//! webhook dispatcher, session supervisor, and HTTP gateway together, then
//! runs until a shutdown signal arrives or the supervisor gives up under
//! the restart exhaustion policy.

use std::sync::Arc;

use parley_config::model::ParleyConfig;
use parley_core::error::ParleyError;
use parley_core::traits::DriverFactory;
use parley_gateway::GatewayState;
use parley_session::guardian::MemoryGuardian;
use parley_session::media_cache::MediaCache;
use parley_session::SessionSupervisor;
use parley_sim::SimDriverFactory;
use parley_webhook::WebhookDispatcher;
use tracing::{error, info};

use crate::shutdown;

/// Resolves the configured driver name to a factory.
///
/// `sim` is the only compiled-in driver; protocol-backed drivers plug in
/// here under their own names.
fn build_driver_factory(config: &ParleyConfig) -> Result<Arc<dyn DriverFactory>, ParleyError> {
    match config.session.driver.as_str() {
        "sim" => Ok(Arc::new(SimDriverFactory::auto())),
        other => Err(ParleyError::Config(format!(
            "unknown session.driver `{other}` (available: sim)"
        ))),
    }
}

/// Runs the `parley serve` command.
pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    init_tracing(&config.service.log_level);

    info!("starting parley serve");

    let factory = build_driver_factory(&config)?;
    let cache = Arc::new(MediaCache::new(config.media.cache_bound));
    let guardian = Arc::new(MemoryGuardian::new(&config.memory, Arc::clone(&cache)));
    let dispatcher = WebhookDispatcher::new(&config.webhook)?;

    if !dispatcher.is_configured() {
        info!("no webhook configured; inbound messages will be logged and dropped");
    }

    let (supervisor, session_handle) = SessionSupervisor::new(
        factory,
        Arc::clone(&cache),
        dispatcher,
        Arc::clone(&guardian),
        &config,
    );

    let cancel = shutdown::install_signal_handler();

    let guardian_task = tokio::spawn(Arc::clone(&guardian).run(cancel.clone()));

    let gateway_state = GatewayState {
        session: session_handle,
        memory: guardian.sample_receiver(),
    };
    let gateway_config = config.gateway.clone();
    let gateway_cancel = cancel.clone();
    let gateway_task = tokio::spawn(async move {
        if let Err(e) =
            parley_gateway::start_server(&gateway_config, gateway_state, gateway_cancel.clone())
                .await
        {
            error!(error = %e, "gateway server failed");
            gateway_cancel.cancel();
        }
    });

    // The supervisor is the foreground task; everything else follows its
    // cancellation token.
    let result = supervisor.run(cancel.clone()).await;

    cancel.cancel();
    let _ = guardian_task.await;
    let _ = gateway_task.await;

    info!("parley serve stopped");
    result
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "parley={log_level},parley_session={log_level},parley_gateway={log_level},\
             parley_webhook={log_level},parley_sim={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_driver_factory_resolves() {
        let config = ParleyConfig::default();
        assert!(build_driver_factory(&config).is_ok());
    }

    #[test]
    fn unknown_driver_is_a_config_error() {
        let mut config = ParleyConfig::default();
        config.session.driver = "carrier-pigeon".to_string();

        let err = build_driver_factory(&config).err().unwrap();
        assert!(matches!(err, ParleyError::Config(_)));
        assert!(err.to_string().contains("carrier-pigeon"));
    }
}
