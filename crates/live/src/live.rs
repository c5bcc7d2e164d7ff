// Live updates facade
//
// Wires the connection manager, topic router and cache reconciler together
// for one authenticated session.

use crate::connection::{ConnectionManager, ConnectionState};
use crate::router::{SubscriptionHandle, TopicRouter};
use crate::transport::{Connector, WsConnector};
use clinicpulse_core::{
    CacheReconciler, ClinicPulseError, Config, Credential, EmergencyAlerts, InboundMessage,
    NotificationLog, ReadCache, Scope, Session, SessionEvent, SessionProvider,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;

pub struct LiveUpdates {
    manager: ConnectionManager,
    reconciler: Arc<CacheReconciler>,
}

impl LiveUpdates {
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        cache: Arc<dyn ReadCache>,
        notifications: Arc<NotificationLog>,
    ) -> Self {
        let alerts = Arc::new(EmergencyAlerts::with_capacity(
            config.notifications.alert_capacity,
        ));
        let reconciler = Arc::new(
            CacheReconciler::new(cache, notifications, alerts)
                .with_stale_keys(config.cache.stale_on_notification.clone()),
        );
        let router = Arc::new(TopicRouter::with_sink(reconciler.clone()));
        let manager = ConnectionManager::new(config.live.clone(), connector, router);
        Self {
            manager,
            reconciler,
        }
    }

    /// Production wiring over a real WebSocket.
    pub fn with_websocket(
        config: &Config,
        cache: Arc<dyn ReadCache>,
        notifications: Arc<NotificationLog>,
    ) -> Self {
        Self::new(config, Arc::new(WsConnector::new()), cache, notifications)
    }

    pub fn subscribe<F>(&self, scope: Scope, handler: F) -> SubscriptionHandle
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.manager.router().subscribe(scope, handler)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.manager.router().unsubscribe(handle)
    }

    pub fn start(&self, credential: Credential) -> Result<(), ClinicPulseError> {
        self.manager.start(credential)
    }

    pub fn stop(&self) {
        self.manager.stop()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        self.manager.router()
    }

    pub fn reconciler(&self) -> &Arc<CacheReconciler> {
        &self.reconciler
    }

    pub fn notifications(&self) -> &Arc<NotificationLog> {
        self.reconciler.notifications()
    }

    pub fn alerts(&self) -> &Arc<EmergencyAlerts> {
        self.reconciler.alerts()
    }

    /// Drive the connection from `provider`: connect on login, stop on
    /// logout, reconnect when only the credential changes.
    ///
    /// Transitions are applied inline, so every subscription is gone by the
    /// time `logout()` returns. Must be called within a tokio runtime, which
    /// later logins reuse to spawn the connection.
    pub fn follow_session(self: &Arc<Self>, provider: &SessionProvider) -> Result<(), ClinicPulseError> {
        let runtime = Handle::try_current().map_err(|_| {
            ClinicPulseError::Other("following a session needs a tokio runtime".to_string())
        })?;
        let live = Arc::downgrade(self);
        let current: Mutex<Option<Session>> = Mutex::new(None);
        let apply = Arc::new(move |event: &SessionEvent| {
            let Some(live) = live.upgrade() else {
                return;
            };
            let _runtime = runtime.enter();
            live.apply_session_event(&mut current.lock(), event);
        });

        let registered = apply.clone();
        provider.on_change(move |event| registered(event));
        if let Some(session) = provider.current() {
            apply(&SessionEvent::LoggedIn(session));
        }
        Ok(())
    }

    fn apply_session_event(&self, current: &mut Option<Session>, event: &SessionEvent) {
        match event {
            SessionEvent::LoggedOut => {
                current.take();
                self.stop();
            }
            SessionEvent::LoggedIn(session) => match current.replace(session.clone()) {
                Some(previous) if previous == *session => {}
                Some(previous) if previous.role == session.role => {
                    self.manager.restart(session.credential.clone());
                }
                previous => {
                    // a role switch keeps nothing from the previous session
                    if previous.is_some() {
                        self.stop();
                    }
                    if let Err(e) = self.start(session.credential.clone()) {
                        tracing::warn!("Could not start live updates: {}", e);
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportLink;
    use async_trait::async_trait;
    use clinicpulse_core::{MemoryCache, Role};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Accepts every connection and records the bearer used.
    struct RecordingConnector {
        credentials: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Connector for RecordingConnector {
        async fn open(
            &self,
            _url: &str,
            credential: &Credential,
        ) -> Result<TransportLink, ClinicPulseError> {
            let _ = self.credentials.send(credential.token().to_string());
            let (outbound, _sent) = mpsc::unbounded_channel();
            let (_server, inbound) = mpsc::unbounded_channel();
            // both far ends dropped: the link closes right away
            Ok(TransportLink { outbound, inbound })
        }
    }

    fn live(config: &Config) -> (Arc<LiveUpdates>, mpsc::UnboundedReceiver<String>) {
        let (credentials, rx) = mpsc::unbounded_channel();
        let live = LiveUpdates::new(
            config,
            Arc::new(RecordingConnector { credentials }),
            Arc::new(MemoryCache::new()),
            Arc::new(NotificationLog::new(10)),
        );
        (Arc::new(live), rx)
    }

    async fn next_token(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a connection attempt")
            .expect("connector dropped")
    }

    fn slot_scope() -> Scope {
        Scope::slots(1, chrono::NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
    }

    fn slow_retry() -> Config {
        let mut config = Config::default();
        config.live.reconnect_delay_ms = 10_000;
        config
    }

    #[tokio::test]
    async fn test_follow_session_login_logout() {
        let (live, mut tokens) = live(&slow_retry());
        let provider = SessionProvider::new();
        live.follow_session(&provider).unwrap();

        assert_eq!(live.state(), ConnectionState::Idle);
        provider.login(Credential::new("first"), Role::Doctor);
        assert_eq!(next_token(&mut tokens).await, "first");

        provider.logout();
        assert_eq!(live.state(), ConnectionState::Idle);

        provider.login(Credential::new("second"), Role::Admin);
        assert_eq!(next_token(&mut tokens).await, "second");
        live.stop();
    }

    #[tokio::test]
    async fn test_logout_then_login_drops_previous_subscriptions() {
        let (live, mut tokens) = live(&slow_retry());
        live.subscribe(slot_scope(), |_| {});
        let provider = SessionProvider::new();
        live.follow_session(&provider).unwrap();

        provider.login(Credential::new("doctor-a"), Role::Doctor);
        assert_eq!(next_token(&mut tokens).await, "doctor-a");

        provider.logout();
        provider.login(Credential::new("admin-b"), Role::Admin);
        assert!(live.router().active_topics().is_empty());
        assert_eq!(next_token(&mut tokens).await, "admin-b");
        live.stop();
    }

    #[tokio::test]
    async fn test_logout_then_login_same_token_reconnects() {
        let (live, mut tokens) = live(&slow_retry());
        live.subscribe(Scope::PersonalQueue, |_| {});
        let provider = SessionProvider::new();
        live.follow_session(&provider).unwrap();
        let mut states = live.watch_state();

        provider.login(Credential::new("a"), Role::Doctor);
        assert_eq!(next_token(&mut tokens).await, "a");

        let _ = states.borrow_and_update();
        provider.logout();
        assert!(states.has_changed().unwrap());
        assert_eq!(live.state(), ConnectionState::Idle);
        assert!(live.router().active_topics().is_empty());

        provider.login(Credential::new("a"), Role::Doctor);
        assert_eq!(next_token(&mut tokens).await, "a");
        live.stop();
    }

    #[tokio::test]
    async fn test_follow_session_restarts_on_new_credential() {
        let (live, mut tokens) = live(&slow_retry());
        live.subscribe(Scope::PersonalQueue, |_| {});
        let provider = SessionProvider::new();
        live.follow_session(&provider).unwrap();

        provider.login(Credential::new("a"), Role::Doctor);
        assert_eq!(next_token(&mut tokens).await, "a");

        provider.login(Credential::new("b"), Role::Doctor);
        assert_eq!(next_token(&mut tokens).await, "b");
        assert_eq!(live.router().active_topics(), vec!["/user/queue/notifications"]);
        live.stop();
    }

    #[tokio::test]
    async fn test_role_switch_without_logout_drops_subscriptions() {
        let (live, mut tokens) = live(&slow_retry());
        live.subscribe(slot_scope(), |_| {});
        let provider = SessionProvider::new();
        live.follow_session(&provider).unwrap();

        provider.login(Credential::new("a"), Role::Doctor);
        assert_eq!(next_token(&mut tokens).await, "a");
        provider.login(Credential::new("b"), Role::Admin);
        assert!(live.router().active_topics().is_empty());
        assert_eq!(next_token(&mut tokens).await, "b");
        live.stop();
    }

    #[tokio::test]
    async fn test_follow_session_picks_up_existing_login() {
        let (live, mut tokens) = live(&slow_retry());
        let provider = SessionProvider::new();
        provider.login(Credential::new("early"), Role::Doctor);
        live.follow_session(&provider).unwrap();
        assert_eq!(next_token(&mut tokens).await, "early");
        live.stop();
    }

    #[test]
    fn test_follow_session_requires_runtime() {
        let (live, _tokens) = live(&Config::default());
        let provider = SessionProvider::new();
        assert!(live.follow_session(&provider).is_err());
    }

    #[tokio::test]
    async fn test_facade_shares_logs_with_reconciler() {
        let (live, _tokens) = live(&Config::default());
        let notice: clinicpulse_core::AppointmentNotice = serde_json::from_str(
            r#"{"patientFullName":"Maria Petrova","appointmentTime":"2025-03-10T09:30:00","message":"New appointment"}"#,
        )
        .unwrap();
        live.reconciler().apply_notification(&notice);

        assert_eq!(live.notifications().len(), 1);
        assert_eq!(live.notifications().unread_count(), 1);
        assert!(live.alerts().is_empty());
    }
}
