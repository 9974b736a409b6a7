use std::process;

use facciata::{
    config,
    infra::{error::InfraError, http, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (_cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    let state = http::build_state(&settings)?;
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(
        target = "facciata::server",
        addr = %settings.server.addr,
        cache_root = %settings.cache.root_dir.display(),
        "front filter listening"
    );

    let grace = settings.server.graceful_shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!(
                target = "facciata::server",
                grace_secs = grace.as_secs(),
                "shutdown signal received, draining connections"
            );
        })
        .await?;

    Ok(())
}
