//! Customer notifications.
//!
//! Licensor never sends mail itself. It hands a [`Notification`] to a
//! [`NotificationSink`] and the embedding application decides how to deliver it.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::model::{License, ProductRef};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LicenseCreated {
        key: String,
        customer_email: Option<String>,
        product: ProductRef,
    },
    LicenseExpiring {
        key: String,
        customer_email: Option<String>,
        expires_on: NaiveDate,
        days_left: i64,
    },
    LicenseExpired {
        key: String,
        customer_email: Option<String>,
    },
}

impl Notification {
    pub fn created(license: &License) -> Self {
        Notification::LicenseCreated {
            key: license.key.clone(),
            customer_email: license.customer_email.clone(),
            product: license.product.clone(),
        }
    }

    pub fn expiring(license: &License, expires_on: NaiveDate, today: NaiveDate) -> Self {
        Notification::LicenseExpiring {
            key: license.key.clone(),
            customer_email: license.customer_email.clone(),
            expires_on,
            days_left: (expires_on - today).num_days(),
        }
    }

    pub fn expired(license: &License) -> Self {
        Notification::LicenseExpired {
            key: license.key.clone(),
            customer_email: license.customer_email.clone(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Notification::LicenseCreated { key, .. }
            | Notification::LicenseExpiring { key, .. }
            | Notification::LicenseExpired { key, .. } => key,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    ChannelClosed,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Deliver `notification`; a failing sink is logged, never propagated.
pub fn send(sink: &dyn NotificationSink, notification: Notification) {
    let key = notification.key().to_string();
    if let Err(e) = sink.notify(notification) {
        warn!(license_key = %key, "notification not delivered: {e}");
    }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        match &notification {
            Notification::LicenseCreated { key, product, .. } => {
                info!(license_key = %key, product = %product, "License created notification");
            }
            Notification::LicenseExpiring { key, days_left, .. } => {
                info!(license_key = %key, days_left, "License expiring notification");
            }
            Notification::LicenseExpired { key, .. } => {
                info!(license_key = %key, "License expired notification");
            }
        }
        Ok(())
    }
}

/// Forwards notifications to a tokio channel for an application-side mailer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx
            .send(notification)
            .map_err(|_| NotifyError::ChannelClosed)
    }
}
