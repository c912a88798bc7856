use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use licensor::audit::{AuditSink, FanOutAuditSink, MemoryAuditLog, TracingAuditSink};
use licensor::config::get_config;
use licensor::logging::init_logging;
use licensor::server::{build_router, AppState, AuthState};
use licensor::store::Database;
use licensor::Licensor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = get_config()?;
    init_logging(&config.logging);

    let database = Database::connect(&config.database).await?;
    database.migrate().await?;

    let auth = AuthState::from_config(&config.auth)?;

    let activity = Arc::new(MemoryAuditLog::new(config.audit.max_entries_per_license));
    let audit = FanOutAuditSink::new(vec![
        Arc::new(TracingAuditSink) as Arc<dyn AuditSink>,
        activity.clone() as Arc<dyn AuditSink>,
    ]);

    let licensor = Arc::new(
        Licensor::builder(database.clone())
            .config(config)
            .audit(Arc::new(audit))
            .build(),
    );

    #[cfg(feature = "background-jobs")]
    let _scheduler = if config.jobs.enabled {
        let scheduler =
            licensor::jobs::JobScheduler::new(Arc::clone(&licensor), config.jobs.clone())
                .await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        None
    };

    let state = AppState::new(licensor, Some(database))
        .with_auth(auth)
        .with_activity_log(activity)
        .with_rate_limit(config.rate_limit.clone());
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Licensor listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
