//! `quotation-recalc` -- run one CONVAL recalculation from the command line.
//!
//! Binds a recalculation session to one estimate sheet, fires the
//! automatic trigger once with the given payload and follows the job
//! through the queue until the dependent data has been refreshed.
//!
//! # Environment variables
//!
//! | Variable          | Required | Default | Description                                  |
//! |-------------------|----------|---------|----------------------------------------------|
//! | `CONVAL_API_URL`  | yes      | --      | Backend base URL, e.g. `http://host:8080/api` |
//! | `ESTIMATE_NO`     | yes      | --      | Estimate number (correlation key)            |
//! | `SHEET_INDEX`     | no       | `0`     | Sheet of the estimate to recalculate          |
//! | `RECALC_PAYLOAD`  | no       | `{}`    | JSON input forwarded to the engine           |
//!
//! Timing overrides (`CONVAL_POLL_INTERVAL_MS` and friends) are read by
//! [`RecalcConfig::from_env`].
//!
//! Exit code is `0` once refreshed data is available and `1` on any
//! failure, timeout or fallback reset.

use std::sync::Arc;

use quotation_conval::api::{ConvalApi, ConvalBackend};
use quotation_conval::config::RecalcConfig;
use quotation_conval::controller::RecalcController;
use quotation_core::recalc::RecalcEvent;
use quotation_core::types::SheetIndex;
use tokio::sync::broadcast::error::RecvError;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotation_recalc=info,quotation_conval=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RecalcConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let estimate_no = std::env::var("ESTIMATE_NO").unwrap_or_else(|_| {
        tracing::error!("ESTIMATE_NO environment variable is required");
        std::process::exit(1);
    });

    let sheet_index: SheetIndex = std::env::var("SHEET_INDEX")
        .ok()
        .map(|v| {
            v.parse().unwrap_or_else(|_| {
                tracing::error!("SHEET_INDEX must be a non-negative integer");
                std::process::exit(1);
            })
        })
        .unwrap_or(0);

    let payload: serde_json::Value = std::env::var("RECALC_PAYLOAD")
        .ok()
        .map(|raw| {
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::error!(error = %e, "RECALC_PAYLOAD must be valid JSON");
                std::process::exit(1);
            })
        })
        .unwrap_or_else(|| serde_json::json!({}));

    let api = ConvalApi::from_config(&config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build CONVAL client");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %api.api_url(),
        estimate_no = %estimate_no,
        sheet_index,
        "Starting quotation-recalc",
    );

    let backend: Arc<dyn ConvalBackend> = Arc::new(api);
    let mut controller = RecalcController::new(backend, config.timings.clone());

    let code = match run(&mut controller, &estimate_no, sheet_index, payload).await {
        Ok(()) => 0,
        Err(reason) => {
            tracing::error!(reason = %reason, "Recalculation did not complete");
            1
        }
    };

    controller.shutdown().await;
    std::process::exit(code);
}

/// Fire the recalculation and wait for its terminal event.
async fn run(
    controller: &mut RecalcController,
    estimate_no: &str,
    sheet_index: SheetIndex,
    payload: serde_json::Value,
) -> Result<(), String> {
    let session = controller
        .bind(estimate_no, sheet_index)
        .await
        .map_err(|e| e.to_string())?;

    let mut events = session.subscribe();
    session.data_loaded(payload).await.map_err(|e| e.to_string())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping recalculation");
                return Err("interrupted".to_string());
            }
            event = events.recv() => match event {
                Ok(RecalcEvent::Refreshed { data }) => {
                    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
                    return Ok(());
                }
                Ok(RecalcEvent::SubmitFailed { error }) => return Err(error),
                Ok(RecalcEvent::RefreshFailed { error }) => return Err(error),
                Ok(RecalcEvent::TimedOut) => return Err("job timed out".to_string()),
                Ok(RecalcEvent::PollFallbackReset) => {
                    return Err("queue status unavailable".to_string());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged");
                }
                Err(RecvError::Closed) => return Err("session closed".to_string()),
            },
        }
    }
}
