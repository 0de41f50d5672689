//! Vault handoff HTTP entrypoint.
//!
//! Endpoints:
//! - `POST /api/vgs/process-complete-flow` – Create customer, payment method and subscription from a tokenized card
//! - `GET /api/vgs/config` – Vault id and environment for the field-capture widget
//! - `GET /api/vgs/get-collect-token` – Short-lived vault access token
//! - `GET /health` – Liveness
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` path to the JSON configuration (default `config.json`)
//! - `HOST`, `PORT` control binding address
//! - `RUST_LOG` log filter, `OTEL_*` variables enable OTLP export with the `telemetry` feature

use std::process;

use vault_handoff::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
