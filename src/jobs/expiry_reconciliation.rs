//! Expiry reconciliation job.
//!
//! Expiry is evaluated lazily on every read, so this job is optional: it
//! rewrites licenses whose stored status is still `active` after their expiry
//! day to `expired` and tells the customer.

use tracing::{debug, info, warn};

use crate::model::{today, LicenseFilter, LicenseStatus};
use crate::notify::{send, Notification};
use crate::service::Licensor;

use super::JobError;

/// Persist `expired` for stale active licenses.
///
/// Candidates are re-checked under their key lock before the write, so an
/// admin renewal between the query and the update is never overwritten.
/// Returns the number of licenses rewritten. A license that fails to update is
/// logged and skipped.
pub async fn run_expiry_reconciliation(licensor: &Licensor) -> Result<u32, JobError> {
    let today = today();
    debug!(%today, "Checking for stale active licenses");

    let stale: Vec<String> = licensor
        .find(&LicenseFilter::all().with_status(LicenseStatus::Expired))
        .await?
        .into_iter()
        .filter(|license| license.status == LicenseStatus::Active)
        .map(|license| license.key)
        .collect();

    let mut count = 0;
    for key in stale {
        match licensor.reconcile_expiry(&key, today).await {
            Ok(Some(updated)) => {
                count += 1;
                info!(license_key = %updated.key, expiry = %updated.expiry, "License expired");
                send(licensor.notifier().as_ref(), Notification::expired(&updated));
            }
            Ok(None) => debug!(license_key = %key, "License no longer stale, skipping"),
            Err(e) => warn!(license_key = %key, "Failed to expire license: {e}"),
        }
    }

    Ok(count)
}
