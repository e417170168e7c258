//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::{CheckoutConfig, EngineSettings};
use crate::db::CheckoutStore;
use crate::services::{
    CheckoutService, EntitlementTarget, HttpEntitlementClient, HttpIdentityProvider,
    IdentityProvider, LinkBuilder, LogNotifier, LogTarget, MagicLinkProvisioner, Notifier,
    OrderLedger, ResumeTokenService, ServicePlanMapper, SyncReconciler, WebhookNotifier,
};

/// The external systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub target: Arc<dyn EntitlementTarget>,
}

impl Collaborators {
    /// HTTP clients for everything configured, log-only stand-ins otherwise.
    #[must_use]
    pub fn from_config(config: &CheckoutConfig, client: &reqwest::Client) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(client.clone(), url.clone())),
            None => Arc::new(LogNotifier),
        };
        let target: Arc<dyn EntitlementTarget> = match &config.entitlement {
            Some(entitlement) => Arc::new(HttpEntitlementClient::new(
                client.clone(),
                entitlement.clone(),
            )),
            None => Arc::new(LogTarget),
        };

        Self {
            identity: Arc::new(HttpIdentityProvider::new(
                client.clone(),
                config.identity.clone(),
            )),
            notifier,
            target,
        }
    }
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn CheckoutStore>,
    checkout: CheckoutService,
    sync: SyncReconciler,
    settings: EngineSettings,
}

impl AppState {
    /// Wire every service over one store.
    #[must_use]
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        collaborators: Collaborators,
        settings: EngineSettings,
        links: LinkBuilder,
    ) -> Self {
        let mapper = ServicePlanMapper::new(Arc::clone(&store), settings.plan_cache_ttl);
        let provisioner = MagicLinkProvisioner::new(
            Arc::clone(&store),
            mapper,
            collaborators.identity,
            settings.magic_link_ttl,
        );
        let checkout = CheckoutService::new(
            OrderLedger::new(Arc::clone(&store), settings.order_ttl),
            ResumeTokenService::new(Arc::clone(&store)),
            provisioner,
            collaborators.notifier,
            links,
        );
        let sync = SyncReconciler::new(Arc::clone(&store), collaborators.target, settings.sync);

        Self {
            inner: Arc::new(AppStateInner {
                store,
                checkout,
                sync,
                settings,
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn CheckoutStore {
        self.inner.store.as_ref()
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn sync(&self) -> &SyncReconciler {
        &self.inner.sync
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }
}
