// esx-doctor main.rs
// Interactive viewer backend for large esxtop/PDH counter CSV exports.

use chrono::Duration;
use esx_server::api::{app, AppState};
use esx_server::ingest::guess_default_csv;
use esx_server::session::SessionStore;
use std::sync::Arc;

const SESSION_TTL_HOURS: i64 = 24;
const SWEEP_INTERVAL_SECS: u64 = 30 * 60;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "esx_doctor=info,esx_server=info,esx_core=info,esx_diagnostics=info".into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let file_flag: Option<String> = args
        .iter()
        .position(|a| a == "-file" || a == "--file")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let port: u16 = args
        .iter()
        .position(|a| a == "-port" || a == "--port")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            std::env::var("ESX_DOCTOR_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or(8080);

    // Bootstrap file: explicit flag is fatal on failure; the
    // working-directory fallback is best-effort.
    let mut bootstrap = None;
    if let Some(file) = file_flag.filter(|f| !f.trim().is_empty()) {
        let abs = match std::path::absolute(file.trim()) {
            Ok(abs) => abs,
            Err(err) => {
                tracing::error!("invalid -file path: {}", err);
                std::process::exit(1);
            }
        };
        if std::fs::metadata(&abs).is_err() {
            tracing::error!("file not found: {}", abs.display());
            std::process::exit(1);
        }
        match esx_core::build_index(&abs) {
            Ok(df) => {
                tracing::info!("loaded startup file: {}", df.label);
                bootstrap = Some(Arc::new(df));
            }
            Err(err) => {
                tracing::error!("index build failed: {}", err);
                std::process::exit(1);
            }
        }
    } else if let Some(guessed) = guess_default_csv() {
        match esx_core::build_index(&guessed) {
            Ok(df) => {
                tracing::info!("auto-loaded CSV: {}", df.label);
                bootstrap = Some(Arc::new(df));
            }
            Err(err) => {
                tracing::warn!(
                    "default CSV found but indexing failed ({}): {}",
                    guessed.display(),
                    err
                );
            }
        }
    } else {
        tracing::info!("no startup CSV found; open one from the UI file picker");
    }

    let builtins = match esx_diagnostics::load_builtin_templates() {
        Ok(builtins) => builtins,
        Err(err) => {
            tracing::error!("failed to load diagnostic templates: {}", err);
            std::process::exit(1);
        }
    };
    let templates = match esx_diagnostics::TemplateStore::open(None, builtins) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!("failed to open template store: {}", err);
            std::process::exit(1);
        }
    };

    let file_label = bootstrap.as_ref().map(|df| df.label.clone());
    let state = Arc::new(AppState {
        sessions: SessionStore::new(bootstrap, Duration::hours(SESSION_TTL_HOURS)),
        templates,
    });

    // Periodic expiration sweep; evicted sessions release any owned temps.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
            sweep_state.sessions.cleanup_expired().await;
        }
    });

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("esx-doctor listening on {}", addr);
    tracing::info!("open: http://localhost:{}", port);
    if let Some(label) = file_label {
        tracing::info!("file: {}", label);
    }

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind {}: {}", addr, err);
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {}", err);
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}
