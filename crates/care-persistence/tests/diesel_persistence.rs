// Pruebas contra SQLite en archivo temporal. Con la feature `pg` se omiten.
#![cfg(not(feature = "pg"))]

use care_domain::{CanonicalEvent, EpisodeState, GuardContext, NewEpisode, Subject};
use care_persistence::{CarePersistence, PersistenceConfig};
use lifecycle::{reconcile, AuditMode, Disposition, EpisodeStore, EventLog, LifecycleConfig, LifecycleError,
                OutboxRelay, OutboxStore, TransitionExecutor, TransitionOutcome, TransitionRequest};
use serde_json::{json, Map};
use std::path::PathBuf;
use uuid::Uuid;

/// Base temporal que se borra (con sus archivos WAL) al salir de la prueba.
struct TempDb {
  path: PathBuf,
  stores: CarePersistence,
}

impl TempDb {
  fn new() -> Self {
    let path = std::env::temp_dir().join(format!("careflow_test_{}.db", Uuid::new_v4()));
    let config = PersistenceConfig::new(path.to_str().unwrap()).with_pool_size(4);
    let stores = CarePersistence::connect(&config).expect("connect sqlite");
    TempDb { path, stores }
  }

  fn executor(&self, mode: AuditMode) -> TransitionExecutor {
    TransitionExecutor::new(self.stores.episodes.clone(),
                            self.stores.events.clone(),
                            LifecycleConfig::with_audit_mode(mode))
  }
}

impl Drop for TempDb {
  fn drop(&mut self) {
    for suffix in ["", "-wal", "-shm"] {
      let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
    }
  }
}

fn event_at(episode_id: &str, ts: i64, tag: &str) -> CanonicalEvent {
  let mut meta = Map::new();
  meta.insert("tag".into(), json!(tag));
  CanonicalEvent { id: Uuid::new_v4(),
                   event_type: "Note.Added".into(),
                   subject: Subject::episode(episode_id),
                   actor_user_id: None,
                   meta,
                   timestamp: ts }
}

#[test]
fn episodes_round_trip_through_the_database() {
  let db = TempDb::new();
  let store = &db.stores.episodes;
  let ep = store.insert(NewEpisode::for_patient("pat-1").with_id("ep-b").with_reason("dolor")).unwrap();
  store.insert(NewEpisode::for_patient("pat-2").with_id("ep-a")).unwrap();
  assert_eq!(ep.state, EpisodeState::LeadCapture);

  let got = store.get("ep-b").unwrap().expect("stored");
  assert_eq!(got, ep);
  assert!(store.get("nope").unwrap().is_none());
  assert_eq!(store.list_ids().unwrap(), vec!["ep-a".to_string(), "ep-b".to_string()]);

  let dup = store.insert(NewEpisode::for_patient("pat-3").with_id("ep-a")).unwrap_err();
  assert!(matches!(dup, LifecycleError::Storage(_)));
}

#[test]
fn executor_over_diesel_records_the_reference_workflow() {
  let db = TempDb::new();
  let exec = db.executor(AuditMode::Direct);
  db.stores.episodes.insert(NewEpisode::for_patient("p").with_id("ep-1")).unwrap();

  for (trigger, ctx) in [("Lead.Qualified", GuardContext::new()),
                         ("Triage.Routed", GuardContext::new()),
                         ("Appointment.Confirmed", GuardContext::new()),
                         ("Consent.Signed.Base", GuardContext::new().with_base_consent(true))]
  {
    let out = exec.apply_episode_transition(TransitionRequest::new("ep-1", trigger).by("u-9").with_context(ctx))
                  .unwrap();
    assert!(out.changed, "{}", trigger);
  }
  let ep = db.stores.episodes.get("ep-1").unwrap().unwrap();
  assert_eq!(ep.state, EpisodeState::Exploration);

  let history = db.stores.events.list_for_subject(&Subject::episode("ep-1")).unwrap();
  let pairs: Vec<(EpisodeState, EpisodeState)> =
    history.iter().filter_map(|e| e.state_change()).map(|m| (m.from, m.to)).collect();
  assert_eq!(pairs,
             vec![(EpisodeState::LeadCapture, EpisodeState::Triage),
                  (EpisodeState::Triage, EpisodeState::Scheduling),
                  (EpisodeState::Scheduling, EpisodeState::Intake),
                  (EpisodeState::Intake, EpisodeState::Exploration)]);
  assert_eq!(history.last().unwrap().timestamp, ep.updated_at);
  assert_eq!(db.stores.events.get(&history[0].id).unwrap(), Some(history[0].clone()));

  let ids = db.stores.episodes.list_ids().unwrap();
  assert!(reconcile(db.stores.episodes.as_ref(), db.stores.events.as_ref(), &ids).unwrap().is_empty());
}

#[test]
fn rejected_guard_and_missing_episode_leave_no_trace() {
  let db = TempDb::new();
  let exec = db.executor(AuditMode::Direct);
  db.stores.episodes.insert(NewEpisode::for_patient("p").with_id("ep-g")).unwrap();

  let out = exec.apply_episode_transition(TransitionRequest::new("ep-g", "Quote.Accepted")).unwrap();
  assert!(!out.changed);
  assert_eq!(out.disposition, Disposition::NoSuchEdge);

  let err = exec.apply_episode_transition(TransitionRequest::new("ghost", "Lead.Qualified")).unwrap_err();
  assert!(matches!(err, LifecycleError::NotFound(_)));
  assert_eq!(db.stores.events.count().unwrap(), 0);
}

#[test]
fn outbox_rows_commit_with_the_state_and_relay_once() {
  let db = TempDb::new();
  let exec = db.executor(AuditMode::Outbox);
  db.stores.episodes.insert(NewEpisode::for_patient("p").with_id("ep-o")).unwrap();

  let out = exec.apply_episode_transition(TransitionRequest::new("ep-o", "Lead.Qualified").by("u-1")).unwrap();
  assert!(out.changed);
  assert_eq!(db.stores.episodes.pending_count().unwrap(), 1);
  assert_eq!(db.stores.events.count().unwrap(), 0);
  // Un límite sin tope se acota a i64::MAX en lugar de desbordar.
  assert_eq!(db.stores.episodes.pending(usize::MAX).unwrap().len(), 1);

  let relay = OutboxRelay::new(db.stores.episodes.clone(), db.stores.events.clone());
  assert_eq!(relay.drain(50).unwrap().relayed, 1);
  assert_eq!(relay.drain(50).unwrap().relayed, 0);
  assert_eq!(db.stores.episodes.pending_count().unwrap(), 0);

  let event = db.stores.events.get(&out.event_id.unwrap()).unwrap().expect("relayed event");
  assert_eq!(event.actor_user_id.as_deref(), Some("u-1"));
  assert_eq!(event.meta["to"], "TRIAGE");
}

#[test]
fn append_is_idempotent_and_history_is_ordered() {
  let db = TempDb::new();
  let log = &db.stores.events;
  let late = event_at("ep-h", 300, "late");
  let tie_a = event_at("ep-h", 100, "a");
  let tie_b = event_at("ep-h", 100, "b");
  for e in [&late, &tie_a, &tie_b, &late] {
    log.append(e).unwrap();
  }
  log.append(&event_at("other", 50, "x")).unwrap();

  let tags: Vec<String> = log.list_for_subject(&Subject::episode("ep-h"))
                             .unwrap()
                             .iter()
                             .map(|e| e.meta["tag"].as_str().unwrap().to_string())
                             .collect();
  assert_eq!(tags, vec!["a", "b", "late"]);
  assert_eq!(log.count().unwrap(), 4);
}

#[test]
fn concurrent_triggers_on_sqlite_advance_once() {
  let db = TempDb::new();
  let exec = db.executor(AuditMode::Direct);
  db.stores.episodes.insert(NewEpisode::for_patient("p").with_id("ep-race")).unwrap();

  let outcomes: Vec<TransitionOutcome> = std::thread::scope(|s| {
    let handles: Vec<_> = (0..8).map(|_| {
                                  s.spawn(|| exec.apply_episode_transition(TransitionRequest::new("ep-race", "Lead.Qualified")))
                                })
                                .collect();
    handles.into_iter().map(|h| h.join().unwrap().expect("ningún perdedor debe fallar")).collect()
  });
  assert_eq!(outcomes.iter().filter(|o| o.changed).count(), 1);
  for lost in outcomes.iter().filter(|o| !o.changed) {
    assert_eq!(lost.previous_state, EpisodeState::Triage);
    assert_eq!(lost.disposition, Disposition::NoSuchEdge);
  }
  assert_eq!(db.stores.events.count().unwrap(), 1);
  assert_eq!(db.stores.episodes.get("ep-race").unwrap().unwrap().state, EpisodeState::Triage);
}
