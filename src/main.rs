use std::{process::ExitCode, sync::Arc, time::Duration};

use sysqtt::{
    config::ConfigDocument,
    core::{
        builder::{BuildOutput, RegistryBuilder},
        catalog::Catalog,
        providers::ProviderRegistry,
        publisher::{EngineOptions, PublicationEngine},
        scheduler::Scheduler,
        session::SessionController,
        state::SessionStateHandle,
    },
    logger::LoggerManager,
    print_error,
};
use sysqtt_mqtt::{Backoff, LinkParts, MqttLink};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long the kernel gets to flush `offline` and DISCONNECT on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn log_sensor_table(output: &BuildOutput) {
    let rows: Vec<(&str, String)> = output
        .registry
        .iter()
        .map(|s| (s.id(), format!("ACTIVE ({})", s.refresh())))
        .chain(
            output
                .report
                .disabled
                .iter()
                .map(|id| (id.as_str(), "DISABLED".to_string())),
        )
        .collect();

    let name_width = rows
        .iter()
        .map(|(id, _)| id.len())
        .max()
        .unwrap_or(10)
        .max("Sensor".len());

    info!("{:<width$} | Status", "Sensor", width = name_width);
    info!("{}-+-{}", "-".repeat(name_width), "-".repeat(17));
    for (id, status) in rows {
        info!("{:<width$} | {}", id, status, width = name_width);
    }
    for problem in output.report.skipped.iter().chain(&output.report.dropped) {
        warn!("Not active: {}", problem);
    }
}

async fn shutdown_signal() -> &'static str {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let document = match ConfigDocument::new() {
        Ok(document) => document,
        Err(e) => {
            print_error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let logger_manager = match LoggerManager::new(document.logger.clone()) {
        Ok(manager) => manager,
        Err(e) => {
            print_error!("Failed to set up logging: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger_manager.init() {
        print_error!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    info!("Starting sysqtt version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", document.logger.level);
    debug!("{:#?}", document.transport);

    let catalog = match &document.catalog {
        Some(path) => Catalog::from_path(path),
        None => Catalog::bundled(),
    };
    let catalog = match catalog {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let providers = ProviderRegistry::builtin();
    debug!("{} built-in providers registered", providers.len());
    let output = match RegistryBuilder::new(catalog, &providers)
        .build(&document)
        .await
    {
        Ok(output) => output,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    log_sensor_table(&output);
    let settings = output.settings;
    debug!("{:#?}", settings);

    let LinkParts {
        link,
        events,
        kernel,
    } = match MqttLink::start(&settings.link_config(document.transport.clone())) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to set up the MQTT link: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(output.registry);
    let transport = Arc::new(link.clone());
    let state = SessionStateHandle::new();
    let cancel = CancellationToken::new();
    let topics = settings.topics();

    let controller = SessionController::new(
        registry.clone(),
        state.clone(),
        transport.clone(),
        settings.broker_identity(),
        topics.clone(),
        Backoff::fixed(settings.retry_interval),
        cancel.clone(),
    );
    let engine = Arc::new(PublicationEngine::new(
        registry,
        state.clone(),
        transport,
        &topics,
        EngineOptions::from(&settings),
    ));
    let scheduler = tokio::spawn(
        Scheduler::new(settings.update_interval, state, cancel.clone()).run(engine),
    );

    let outcome = tokio::select! {
        result = controller.run(events) => result,
        name = shutdown_signal() => {
            info!("Received {}, initiating graceful shutdown...", name);
            Ok(())
        }
    };

    cancel.cancel();
    if let Err(e) = scheduler.await {
        error!("Scheduler task failed: {}", e);
    }
    controller.terminate().await;
    if tokio::time::timeout(SHUTDOWN_GRACE, kernel).await.is_err() {
        warn!("MQTT link did not close within {:?}, dropping it", SHUTDOWN_GRACE);
        link.close();
    }

    match outcome {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
