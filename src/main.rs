//! Bridge entry point: parse configuration, install tracing, build shared
//! state, and serve the HTTP/WebSocket surface until a shutdown signal
//! arrives, honoring the configured grace period (spec §5).

use clap::Parser;
use tokio::signal;

use bridge::{info, transport, warn, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::parse();
	bridge::telemetry::init(&config);

	let state = AppState::new(config);
	let grace = state.config.shutdown_grace();
	let bind = state.config.bind;

	tokio::spawn(transport::fanout::run(state.clone()));

	let router = transport::build_router(state.clone());
	let listener = tokio::net::TcpListener::bind(bind).await?;
	info!(%bind, "bridge listening");

	// `with_graceful_shutdown`'s future must resolve the instant a signal
	// arrives so axum stops accepting new connections right away (spec
	// §5) — the grace period is a *separate*, bounded wait for in-flight
	// work afterward, not something the shutdown future itself sleeps
	// through before resolving.
	let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
	let server = tokio::spawn(async move {
		axum::serve(listener, router)
			.with_graceful_shutdown(async {
				let _ = stop_rx.await;
			})
			.await
	});

	shutdown_signal().await;
	info!("shutdown signal received, no longer accepting new connections");
	state.shutdown.notify_waiters();
	let _ = stop_tx.send(());

	match tokio::time::timeout(grace, server).await {
		Ok(Ok(Ok(()))) => {},
		Ok(Ok(Err(e))) => return Err(e.into()),
		Ok(Err(e)) => return Err(e.into()),
		Err(_) => warn!(grace_secs = grace.as_secs(), "grace period elapsed before all connections finished, shutting down anyway"),
	}

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
