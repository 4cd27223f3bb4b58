//! Shared application state and its production wiring.

use std::sync::Arc;

use db::Store;
use effects::http::{build_client, HttpEffects, WebhookChannel};
use effects::{EffectDispatcher, EffectError, NotificationChannel};
use engine::{ExecutorConfig, WorkflowExecutor, WorkflowTriggerHandler, WORKFLOW_TRIGGER};
use queue::{HandlerRegistry, NotificationHandler, TaskHandler, TaskQueueProcessor, SEND_NOTIFICATION};

use crate::dispatcher::ServiceDispatcher;

/// Endpoints of the external collaborators.  `None` leaves a capability
/// unconfigured; calls to it fail with `EffectError::NotConfigured`.
#[derive(Debug, Clone, Default)]
pub struct ServiceUrls {
    pub birthday: Option<String>,
    pub sentiment: Option<String>,
    pub email_relay: Option<String>,
    pub whatsapp_relay: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub executor: Arc<WorkflowExecutor>,
    /// Drains every task type the service knows about.
    pub processor: Arc<TaskQueueProcessor>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<WorkflowExecutor>,
        processor: Arc<TaskQueueProcessor>,
    ) -> Self {
        Self { store, executor, processor }
    }

    /// Build the state around `dispatcher`, registering the notification and
    /// workflow-trigger handlers.
    pub fn assemble(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn EffectDispatcher>,
        notifications: Arc<dyn TaskHandler>,
        config: ExecutorConfig,
    ) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(store.clone(), dispatcher, config));

        let mut handlers = HandlerRegistry::new();
        handlers.insert(SEND_NOTIFICATION.into(), notifications);
        handlers.insert(
            WORKFLOW_TRIGGER.into(),
            Arc::new(WorkflowTriggerHandler::new(store.clone(), executor.clone())) as Arc<dyn TaskHandler>,
        );
        let processor = Arc::new(TaskQueueProcessor::new(store.clone(), handlers));

        Self::new(store, executor, processor)
    }

    /// Wire the HTTP collaborators described by `urls`.
    pub fn wire(
        store: Arc<dyn Store>,
        urls: ServiceUrls,
        config: ExecutorConfig,
    ) -> Result<Self, EffectError> {
        let client = build_client(config.effect_timeout)?;
        let relay = |name: &str, url: Option<String>| {
            url.map(|url| {
                Arc::new(WebhookChannel::new(name, url, client.clone())) as Arc<dyn NotificationChannel>
            })
        };
        let notifications: Arc<dyn TaskHandler> = Arc::new(NotificationHandler::new(
            relay("email", urls.email_relay),
            relay("whatsapp", urls.whatsapp_relay),
        ));

        let mut outbox = HandlerRegistry::new();
        outbox.insert(SEND_NOTIFICATION.into(), notifications.clone());
        let dispatcher = ServiceDispatcher::new(
            HttpEffects::new(client.clone(), urls.birthday, urls.sentiment),
            Arc::new(TaskQueueProcessor::new(store.clone(), outbox)),
        );

        Ok(Self::assemble(store, Arc::new(dispatcher), notifications, config))
    }
}
