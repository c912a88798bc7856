//! Background job scheduler for Licensor.
//!
//! Requires the `background-jobs` feature.
//!
//! # Available Jobs
//!
//! - **Expiry Reconciliation**: rewrites `active` licenses past their expiry day
//!   to `expired` and sends `LicenseExpired` notifications
//!
//! - **Expiry Warnings**: sends `LicenseExpiring` notifications for licenses
//!   expiring within `jobs.expiry_warning_days`
//!
//! # Usage
//!
//! ```rust,ignore
//! use licensor::jobs::JobScheduler;
//!
//! let scheduler = JobScheduler::new(Arc::clone(&licensor), config.jobs.clone()).await?;
//! scheduler.start().await?;
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{error, info};

use crate::config::JobsConfig;
use crate::errors::LicenseError;
use crate::service::Licensor;

mod expiry_reconciliation;
mod expiry_warning;

pub use expiry_reconciliation::run_expiry_reconciliation;
pub use expiry_warning::run_expiry_warnings;

/// Background job scheduler for Licensor.
pub struct JobScheduler {
    scheduler: TokioJobScheduler,
    licensor: Arc<Licensor>,
    config: JobsConfig,
}

impl JobScheduler {
    /// Create a scheduler whose jobs go through `licensor`, sharing its key locks.
    pub async fn new(licensor: Arc<Licensor>, config: JobsConfig) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        Ok(Self {
            scheduler,
            licensor,
            config,
        })
    }

    /// Start the job scheduler with all configured jobs.
    pub async fn start(&self) -> Result<(), JobError> {
        info!("Starting Licensor job scheduler");

        self.add_expiry_reconciliation_job().await?;
        self.add_expiry_warning_job().await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("Licensor job scheduler started successfully");

        Ok(())
    }

    /// Stop the job scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        info!("Shutting down Licensor job scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        Ok(())
    }

    async fn add_expiry_reconciliation_job(&self) -> Result<(), JobError> {
        let licensor = Arc::clone(&self.licensor);

        let job = Job::new_async(
            self.config.expiry_reconciliation_cron.as_str(),
            move |_uuid, _l| {
                let licensor = Arc::clone(&licensor);
                Box::pin(async move {
                    let now = Utc::now().naive_utc();
                    info!("Running expiry reconciliation at {}", now);

                    match run_expiry_reconciliation(&licensor).await {
                        Ok(count) => {
                            if count > 0 {
                                info!("Expiry reconciliation: {} licenses expired", count);
                            }
                        }
                        Err(e) => {
                            error!("Expiry reconciliation failed: {}", e);
                        }
                    }
                })
            },
        )
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!(
            "Added expiry reconciliation job (schedule: {})",
            self.config.expiry_reconciliation_cron
        );

        Ok(())
    }

    async fn add_expiry_warning_job(&self) -> Result<(), JobError> {
        let licensor = Arc::clone(&self.licensor);
        let days = self.config.expiry_warning_days;

        let job = Job::new_async(self.config.expiry_warning_cron.as_str(), move |_uuid, _l| {
            let licensor = Arc::clone(&licensor);
            Box::pin(async move {
                let now = Utc::now().naive_utc();
                info!("Running expiry warning sweep at {}", now);

                match run_expiry_warnings(&licensor, days).await {
                    Ok(count) => {
                        if count > 0 {
                            info!("Expiry warnings: {} customers notified", count);
                        }
                    }
                    Err(e) => {
                        error!("Expiry warning sweep failed: {}", e);
                    }
                }
            })
        })
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!(
            "Added expiry warning job (schedule: {}, window: {} days)",
            self.config.expiry_warning_cron, self.config.expiry_warning_days
        );

        Ok(())
    }

    /// Run the expiry reconciliation immediately.
    pub async fn run_expiry_reconciliation_now(&self) -> Result<u32, JobError> {
        run_expiry_reconciliation(&self.licensor).await
    }

    /// Run the expiry warning sweep immediately.
    pub async fn run_expiry_warnings_now(&self) -> Result<u32, JobError> {
        run_expiry_warnings(&self.licensor, self.config.expiry_warning_days).await
    }
}

/// Errors that can occur in the job scheduler.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Store error: {0}")]
    StoreError(#[from] LicenseError),

    #[error("Job execution error: {0}")]
    ExecutionError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = JobsConfig::default();
        assert_eq!(config.expiry_reconciliation_cron, "0 15 * * * *");
        assert_eq!(config.expiry_warning_cron, "0 0 6 * * *");
        assert_eq!(config.expiry_warning_days, 7);
        assert!(!config.enabled);
    }

    #[test]
    fn store_errors_convert() {
        let err = JobError::from(LicenseError::PersistenceFailure("disk".into()));
        assert!(err.to_string().contains("disk"));
    }
}
