#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
//! Smoke check against a live endpoint: one transactional `select 1;` and
//! one `select 42;` scan. Exits non-zero on the first failure.

use client::{ClientConfig, ClientError, QueryRequest, ScanSettings, TableClient, TxMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: endpoint={}, database={}, max_sessions={}",
        config.endpoint_address,
        config.database_path,
        config.max_sessions
    );

    let client = match TableClient::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            report("connect", &e);
            std::process::exit(1);
        }
    };

    if let Err(e) = select_one(&client).await {
        report("select 1", &e);
        std::process::exit(1);
    }
    if let Err(e) = scan_42(&client).await {
        report("select 42 scan", &e);
        std::process::exit(1);
    }

    client.close().await;
    tracing::info!("Smoke check passed");
}

async fn select_one(client: &TableClient) -> Result<(), ClientError> {
    let request = QueryRequest::new("select 1;");
    let result_sets = client
        .execute_once(TxMode::SerializableReadWrite, &request)
        .await?;
    let Some(result) = result_sets.first() else {
        return Err(ClientError::Decode("select 1 returned no result set".to_string()));
    };
    let value = match result.row(0) {
        Some(row) => row.get_int32(0)?,
        None => return Err(ClientError::Decode("select 1 returned no rows".to_string())),
    };
    tracing::info!(
        "select 1: status=Success rows={} columns={} value={value}",
        result.row_count(),
        result.column_count()
    );
    Ok(())
}

async fn scan_42(client: &TableClient) -> Result<(), ClientError> {
    let request = QueryRequest::new("select 42;");
    let mut session = client.session().await?;
    let mut stream = client
        .executor()
        .execute_streaming(&mut session, &request, ScanSettings::default())
        .await?;

    let mut found = false;
    while let Some(batch) = stream.next_batch().await? {
        for row in &batch {
            found |= row.get_int32(0).is_ok_and(|value| value == 42);
        }
    }
    tracing::info!(
        "select 42 scan: status=Success batches={} rows={}",
        stream.batches_delivered(),
        stream.rows_delivered()
    );
    if found {
        Ok(())
    } else {
        Err(ClientError::Decode("select 42 scan never delivered 42".to_string()))
    }
}

fn report(step: &str, error: &ClientError) {
    tracing::error!("{step} failed ({:?}): {error}", error.kind());
    for issue in error.issues() {
        tracing::error!("  issue: {issue}");
    }
}
