//! Expiry warning job.
//!
//! Notifies customers whose license expires within the warning window. Each
//! license is warned once per expiry date: the send time is recorded on the
//! license and cleared whenever its expiry changes.

use chrono::Days;
use tracing::{debug, info, warn};

use crate::model::{today, LicenseFilter, LicenseStatus};
use crate::notify::{send, Notification};
use crate::service::Licensor;

use super::JobError;

/// Send `LicenseExpiring` for active licenses expiring in the next `days` days.
///
/// Returns the number of warnings sent.
pub async fn run_expiry_warnings(licensor: &Licensor, days: u32) -> Result<u32, JobError> {
    let today = today();
    let horizon = today
        .checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| JobError::ExecutionError(format!("warning window of {days} days overflows")))?;
    debug!(%today, %horizon, "Checking for licenses nearing expiry");

    let due: Vec<String> = licensor
        .find(
            &LicenseFilter::all()
                .with_status(LicenseStatus::Active)
                .expiring_between(today, horizon),
        )
        .await?
        .into_iter()
        .filter(|license| license.expiry_warning_sent_at.is_none())
        .map(|license| license.key)
        .collect();

    let mut count = 0;
    for key in due {
        match licensor.claim_expiry_warning(&key, today, horizon).await {
            Ok(Some((license, expires_on))) => {
                count += 1;
                info!(license_key = %license.key, %expires_on, "Expiry warning sent");
                send(
                    licensor.notifier().as_ref(),
                    Notification::expiring(&license, expires_on, today),
                );
            }
            Ok(None) => debug!(license_key = %key, "License no longer due a warning, skipping"),
            Err(e) => warn!(license_key = %key, "Failed to record expiry warning: {e}"),
        }
    }

    Ok(count)
}
