use chrono::NaiveDate;
use clinicpulse_core::{
    CacheEvent, CacheKey, CacheReconciler, Config, EmergencyAlerts, InboundMessage, MemoryCache,
    MessageSink, NotificationLog, ReadCache, Scope,
};
use clinicpulse_store::FileStore;
use serde_json::json;
use std::sync::Arc;

#[test]
fn core_smoke_config_roundtrip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("clinicpulse.yaml");
    Config::sample().save(&path).expect("save");

    let loaded = Config::load(path.to_str()).expect("load");
    assert_eq!(loaded.live.url(), Config::sample().live.url());
    assert_eq!(loaded.notifications.capacity, 100);
}

#[test]
fn core_smoke_topic_to_scope_and_back() {
    let scope = Scope::slots(12, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    assert_eq!(scope.topic(), "/topic/slots/12/2025-03-10");
    assert_eq!(Scope::from_topic(&scope.topic()).unwrap(), scope);
    assert!(Scope::from_topic("/topic/unknown").is_err());
}

#[tokio::test]
async fn core_smoke_reconciler_through_sink() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileStore::new(temp.path().to_path_buf()).expect("store"));
    let cache = Arc::new(MemoryCache::new());
    let mut events = cache.subscribe();
    let log = Arc::new(NotificationLog::with_store(100, store.clone()));
    let reconciler = CacheReconciler::new(cache.clone(), log, Arc::new(EmergencyAlerts::new()));

    let scope = Scope::slots(3, NaiveDate::from_ymd_opt(2025, 3, 12).unwrap());
    let message = InboundMessage::decode(
        &scope,
        r#"{"id":1,"startTime":"2025-03-12T08:00:00","endTime":"2025-03-12T08:30:00","status":"BOOKED","room":"B2"}"#,
    )
    .unwrap();
    let sink: &dyn MessageSink = &reconciler;
    sink.accept(&scope, &message);

    let key = scope.fetch_key().unwrap();
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(key.clone()));
    let entry = cache.get(&key).unwrap();
    assert_eq!(entry.value[0]["room"], json!("B2"));

    cache.set(CacheKey::todays_appointments(), json!([]));
    let notice = InboundMessage::decode(
        &Scope::PersonalQueue,
        r#"{"patientFullName":"Elena Ivanova","appointmentTime":"2025-03-12T14:00:00","message":"Appointment cancelled"}"#,
    )
    .unwrap();
    sink.accept(&Scope::PersonalQueue, &notice);
    assert!(cache.get(&CacheKey::todays_appointments()).unwrap().stale);

    // a fresh log over the same store sees the persisted entry
    let reopened = NotificationLog::with_store(100, store);
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.entries()[0].patient_full_name, "Elena Ivanova");
}
