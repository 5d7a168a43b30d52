//! Process-wide wiring: one hub, one notification service, one audit ledger.
//!
//! Producers receive these by handle (`Arc`) instead of reaching for globals.

use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Handle;
use tracing::info;

use custody_events::{Hub, HubConfig};

use crate::audit::{AuditLedger, InMemoryLedgerBackend, LedgerBackend, LedgerConfig, PostgresLedgerBackend};
use crate::config::{CustodyConfig, LedgerBackendKind, NotificationStoreKind};
use crate::notifications::{
    InMemoryNotificationStore, NotificationConfig, NotificationService, NotificationStore,
    PostgresNotificationStore,
};

pub type DynNotificationStore = Arc<dyn NotificationStore>;

/// The notification service as wired for a process.
pub type CustodyNotifications = NotificationService<DynNotificationStore, Arc<Hub>>;

pub struct CoreServices {
    pub hub: Arc<Hub>,
    pub notifications: Arc<CustodyNotifications>,
    pub audit: Arc<AuditLedger>,
    postgres_notifications: Option<Arc<PostgresNotificationStore>>,
    postgres_ledger: Option<Arc<PostgresLedgerBackend>>,
}

impl core::fmt::Debug for CoreServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoreServices")
            .field("hub", &self.hub)
            .field("audit", &self.audit)
            .field("postgres_notifications", &self.postgres_notifications.is_some())
            .field("postgres_ledger", &self.postgres_ledger.is_some())
            .finish()
    }
}

impl CoreServices {
    /// In-memory wiring with default settings (dev/test).
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_config(&CustodyConfig::default())
    }

    /// Build every service `config` selects.
    ///
    /// Postgres backends need a Tokio runtime in context; the pool connects
    /// lazily, so nothing touches the database until the first query (or
    /// [`CoreServices::ensure_schema`]).
    pub fn from_config(config: &CustodyConfig) -> anyhow::Result<Self> {
        let hub = Hub::start(HubConfig::default().with_queue_capacity(config.hub_queue_capacity))
            .context("starting hub")?;
        let hub = Arc::new(hub);

        let postgres = if config.needs_database() {
            Some(lazy_pool(config)?)
        } else {
            None
        };

        let mut postgres_notifications = None;
        let store: DynNotificationStore = match (config.notification_store, &postgres) {
            (NotificationStoreKind::Postgres, Some((pool, runtime))) => {
                let store = Arc::new(PostgresNotificationStore::new(pool.clone(), runtime.clone()));
                postgres_notifications = Some(Arc::clone(&store));
                store as DynNotificationStore
            }
            _ => Arc::new(InMemoryNotificationStore::new()),
        };

        let notification_config = NotificationConfig {
            default_ttl: config
                .notification_ttl_days
                .map(|days| Duration::try_days(i64::from(days)).unwrap_or(Duration::MAX)),
        };
        let notifications = Arc::new(NotificationService::with_config(
            store,
            Arc::clone(&hub),
            notification_config,
        ));

        let ledger_config = LedgerConfig {
            scan_cap: config.audit_scan_cap,
            trail_page: config.audit_trail_page,
        };
        let mut postgres_ledger = None;
        let audit = match (config.ledger_backend, &postgres) {
            (LedgerBackendKind::Disabled, _) => AuditLedger::disabled(),
            (LedgerBackendKind::Postgres, Some((pool, runtime))) => {
                let backend = Arc::new(PostgresLedgerBackend::new(pool.clone(), runtime.clone()));
                postgres_ledger = Some(Arc::clone(&backend));
                AuditLedger::with_config(backend as Arc<dyn LedgerBackend>, ledger_config)
            }
            _ => AuditLedger::with_config(Arc::new(InMemoryLedgerBackend::new()), ledger_config),
        };

        info!(
            queue_capacity = config.hub_queue_capacity,
            notification_store = ?config.notification_store,
            audit_backend = audit.backend_name(),
            "custody services wired"
        );

        Ok(Self {
            hub,
            notifications,
            audit: Arc::new(audit),
            postgres_notifications,
            postgres_ledger,
        })
    }

    /// Create the tables of every Postgres backend in use. No-op otherwise.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        if let Some(store) = &self.postgres_notifications {
            store
                .ensure_schema()
                .await
                .context("creating notifications schema")?;
        }
        if let Some(backend) = &self.postgres_ledger {
            backend
                .ensure_schema()
                .await
                .context("creating audit ledger schema")?;
        }
        Ok(())
    }

    /// Stop the hub's control loop. Pending client queues are closed.
    pub fn shutdown(&self) {
        self.hub.shutdown();
    }
}

fn lazy_pool(config: &CustodyConfig) -> anyhow::Result<(PgPool, Handle)> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for postgres backends")?;
    let runtime = Handle::try_current().context("postgres backends need a tokio runtime")?;

    let _guard = runtime.enter();
    let pool = PgPoolOptions::new()
        .connect_lazy(url)
        .context("configuring postgres pool")?;
    Ok((pool, runtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_core::UserId;
    use custody_events::{EventEnvelope, GeneralData, LiveDelivery};

    use crate::notifications::{GeneralNotice, Priority};

    #[test]
    fn in_memory_wiring_shares_one_hub() {
        let services = CoreServices::in_memory().unwrap();
        let receiver = services.hub.connect(UserId::new(1)).unwrap();

        assert!(services.notifications.is_user_online(UserId::new(1)));
        assert!(services.audit.is_enabled());
        assert_eq!(services.audit.backend_name(), "memory");

        let data = GeneralData {
            title: "Inventory".to_string(),
            message: "Cyclic inventory due".to_string(),
            data: None,
        };
        let report = services
            .notifications
            .live()
            .send_to_user(UserId::new(1), &EventEnvelope::general(UserId::new(1), data));
        assert_eq!(report.delivered, vec![UserId::new(1)]);
        assert!(receiver.try_recv().is_ok());

        services.shutdown();
    }

    #[test]
    fn disabled_ledger_is_wired_without_backend() {
        let config = CustodyConfig {
            ledger_backend: LedgerBackendKind::Disabled,
            ..CustodyConfig::default()
        };
        let services = CoreServices::from_config(&config).unwrap();
        assert!(!services.audit.is_enabled());
    }

    #[test]
    fn oversized_ttl_does_not_panic() {
        let config = CustodyConfig {
            notification_ttl_days: Some(u32::MAX),
            ..CustodyConfig::default()
        };
        let services = CoreServices::from_config(&config).unwrap();
        let outcome = services
            .notifications
            .send_general_notification(&GeneralNotice {
                user_id: UserId::new(4),
                title: "Inventory".to_string(),
                message: "Cyclic inventory due".to_string(),
                data: None,
                priority: Priority::Normal,
            })
            .unwrap();
        assert!(outcome.persisted[0].expires_at.is_some());
    }

    #[test]
    fn postgres_without_runtime_is_an_error() {
        let config = CustodyConfig {
            notification_store: NotificationStoreKind::Postgres,
            database_url: Some("postgres://localhost/custody".to_string()),
            ..CustodyConfig::default()
        };
        let err = CoreServices::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("tokio runtime"));
    }
}
