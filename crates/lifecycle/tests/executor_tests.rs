use care_domain::{EpisodeState, GuardContext, NewEpisode, QuoteStatus, Subject, EPISODE_STATE_CHANGED};
use lifecycle::stubs::{InMemoryEpisodeStore, InMemoryEventLog};
use lifecycle::{AuditMode, Disposition, EpisodeStore, LifecycleConfig, LifecycleError, TransitionExecutor,
                TransitionRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(mode: AuditMode) -> (Arc<InMemoryEpisodeStore>, Arc<InMemoryEventLog>, TransitionExecutor) {
  let store = Arc::new(InMemoryEpisodeStore::new());
  let log = Arc::new(InMemoryEventLog::new());
  let exec = TransitionExecutor::new(store.clone(), log.clone(), LifecycleConfig::with_audit_mode(mode));
  (store, log, exec)
}

fn seed_in(store: &InMemoryEpisodeStore, id: &str, state: EpisodeState) {
  let mut ep = NewEpisode::for_patient("patient-1").with_id(id).into_episode(1_000).unwrap();
  ep.state = state;
  store.put(ep);
}

fn from_to(log: &InMemoryEventLog, episode_id: &str) -> Vec<(String, String)> {
  log.all()
     .iter()
     .filter(|e| e.subject == Subject::episode(episode_id))
     .map(|e| (e.meta["from"].as_str().unwrap().to_string(), e.meta["to"].as_str().unwrap().to_string()))
     .collect()
}

#[test]
fn reference_workflow_reaches_exploration_with_four_events() {
  let (store, log, exec) = setup(AuditMode::Direct);
  let ep = store.insert(NewEpisode::for_patient("p-1").with_id("ep-1")).unwrap();
  assert_eq!(ep.state, EpisodeState::LeadCapture);

  let steps = [("Lead.Qualified", GuardContext::new()),
               ("Triage.Routed", GuardContext::new()),
               ("Appointment.Confirmed", GuardContext::new()),
               ("Consent.Signed.Base", GuardContext::new().with_base_consent(true))];
  for (trigger, ctx) in steps {
    let out = exec.apply_episode_transition(TransitionRequest::new("ep-1", trigger).by("user-7").with_context(ctx))
                  .expect("transition");
    assert!(out.changed, "{} should advance", trigger);
    assert_eq!(out.disposition, Disposition::Transitioned);
    assert!(out.event_id.is_some());
  }

  assert_eq!(store.get("ep-1").unwrap().unwrap().state, EpisodeState::Exploration);
  let pairs = from_to(&log, "ep-1");
  let expected: Vec<(String, String)> = [("LEAD_CAPTURE", "TRIAGE"),
                                         ("TRIAGE", "SCHEDULING"),
                                         ("SCHEDULING", "INTAKE"),
                                         ("INTAKE", "EXPLORATION")].iter()
                                                                   .map(|(a, b)| (a.to_string(), b.to_string()))
                                                                   .collect();
  assert_eq!(pairs, expected);

  let history = exec.events().history(&Subject::episode("ep-1")).unwrap();
  assert_eq!(history.len(), 4);
  assert!(history.iter().all(|e| e.event_type == EPISODE_STATE_CHANGED));
  assert!(history.iter().all(|e| e.actor_user_id.as_deref() == Some("user-7")));
  assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn intake_without_base_consent_stays_and_logs_nothing() {
  let (store, log, exec) = setup(AuditMode::Direct);
  seed_in(&store, "ep-intake", EpisodeState::Intake);

  let omitted = exec.apply_episode_transition(TransitionRequest::new("ep-intake", "Consent.Signed.Base")).unwrap();
  let explicit_false =
    exec.apply_episode_transition(TransitionRequest::new("ep-intake", "Consent.Signed.Base").with_context(GuardContext::new().with_base_consent(false)))
        .unwrap();

  for out in [omitted, explicit_false] {
    assert!(!out.changed);
    assert_eq!(out.previous_state, EpisodeState::Intake);
    assert_eq!(out.next_state, EpisodeState::Intake);
    assert_eq!(out.disposition, Disposition::GuardRejected);
    assert!(out.event_id.is_none());
  }
  assert_eq!(store.get("ep-intake").unwrap().unwrap().state, EpisodeState::Intake);
  assert_eq!(store.get("ep-intake").unwrap().unwrap().updated_at, 1_000);
  assert!(log.is_empty());
}

#[test]
fn pending_quote_stays_in_quote() {
  let (store, log, exec) = setup(AuditMode::Direct);
  seed_in(&store, "ep-quote", EpisodeState::Quote);
  let ctx = GuardContext::new().with_specific_consent(true).with_quote_status(QuoteStatus::Pending);
  let out = exec.apply_episode_transition(TransitionRequest::new("ep-quote", "Quote.Accepted").with_context(ctx))
                .unwrap();
  assert!(!out.changed);
  assert_eq!(store.get("ep-quote").unwrap().unwrap().state, EpisodeState::Quote);
  assert!(log.is_empty());

  let ctx = GuardContext::new().with_specific_consent(true).with_quote_status(QuoteStatus::Accepted);
  let out = exec.apply_episode_transition(TransitionRequest::new("ep-quote", "Quote.Accepted").with_context(ctx))
                .unwrap();
  assert!(out.changed);
  assert_eq!(out.next_state, EpisodeState::Treatment);
}

#[test]
fn unknown_or_misplaced_triggers_are_silent_noops() {
  let (store, log, exec) = setup(AuditMode::Direct);
  seed_in(&store, "ep-x", EpisodeState::Triage);
  for trigger in ["Lead.Qualified", "Quote.Accepted", "Triage.Routd", ""] {
    let out = exec.apply_episode_transition(TransitionRequest::new("ep-x", trigger)).unwrap();
    assert!(!out.changed, "{}", trigger);
    assert_eq!(out.next_state, out.previous_state);
    assert_eq!(out.disposition, Disposition::NoSuchEdge);
  }
  assert!(log.is_empty());
}

#[test]
fn missing_episode_is_not_found_and_appends_nothing() {
  let (_store, log, exec) = setup(AuditMode::Direct);
  let err = exec.apply_episode_transition(TransitionRequest::new("ghost", "Lead.Qualified")).unwrap_err();
  assert!(matches!(err, LifecycleError::NotFound(_)), "got {:?}", err);
  assert!(log.is_empty());
}

#[test]
fn repeating_a_trigger_is_idempotent() {
  let (store, log, exec) = setup(AuditMode::Direct);
  store.insert(NewEpisode::for_patient("p").with_id("ep-twice")).unwrap();
  let first = exec.apply_episode_transition(TransitionRequest::new("ep-twice", "Lead.Qualified")).unwrap();
  let second = exec.apply_episode_transition(TransitionRequest::new("ep-twice", "Lead.Qualified")).unwrap();
  assert!(first.changed);
  assert!(!second.changed);
  assert_eq!(second.previous_state, EpisodeState::Triage);
  assert_eq!(log.len(), 1);
}

#[test]
fn event_meta_merges_caller_fields_under_reserved_keys() {
  let (store, log, exec) = setup(AuditMode::Direct);
  seed_in(&store, "ep-meta", EpisodeState::Scheduling);
  let meta = json!({"appointmentId": "apt-3", "to": "MAINTENANCE"}).as_object().unwrap().clone();
  let out = exec.apply_episode_transition(TransitionRequest::new("ep-meta", "Appointment.Confirmed").with_meta(meta))
                .unwrap();
  let event = log.all().pop().unwrap();
  assert_eq!(Some(event.id), out.event_id);
  assert_eq!(event.meta["from"], "SCHEDULING");
  assert_eq!(event.meta["to"], "INTAKE");
  assert_eq!(event.meta["trigger"], "Appointment.Confirmed");
  assert_eq!(event.meta["appointmentId"], "apt-3");
  assert_eq!(event.actor_user_id, None);
  // El evento se fija con la misma marca que el commit del estado.
  assert_eq!(event.timestamp, store.get("ep-meta").unwrap().unwrap().updated_at);
}

#[test]
fn unavailable_store_is_a_configuration_error() {
  let (store, log, exec) = setup(AuditMode::Direct);
  store.insert(NewEpisode::for_patient("p").with_id("ep-off")).unwrap();
  store.set_available(false);
  let err = exec.apply_episode_transition(TransitionRequest::new("ep-off", "Lead.Qualified")).unwrap_err();
  assert!(matches!(err, LifecycleError::Configuration(_)));
  store.set_available(true);
  assert_eq!(store.get("ep-off").unwrap().unwrap().state, EpisodeState::LeadCapture);
  assert!(log.is_empty());
}

#[test]
fn failed_append_surfaces_an_audit_gap_after_commit() {
  let (store, log, exec) = setup(AuditMode::Direct);
  store.insert(NewEpisode::for_patient("p").with_id("ep-gap")).unwrap();
  log.set_reject_appends(true);

  let err = exec.apply_episode_transition(TransitionRequest::new("ep-gap", "Lead.Qualified")).unwrap_err();
  match err {
    LifecycleError::AuditGap { episode_id, outcome, .. } => {
      assert_eq!(episode_id, "ep-gap");
      assert!(outcome.changed);
      assert_eq!(outcome.previous_state, EpisodeState::LeadCapture);
      assert_eq!(outcome.next_state, EpisodeState::Triage);
      assert!(outcome.event_id.is_none());
    }
    other => panic!("expected AuditGap, got {:?}", other),
  }
  // El estado no se revierte.
  assert_eq!(store.get("ep-gap").unwrap().unwrap().state, EpisodeState::Triage);
  assert!(log.is_empty());

  let findings = lifecycle::reconcile(store.as_ref(), log.as_ref(), &["ep-gap".to_string()]).unwrap();
  assert_eq!(findings.len(), 1);
  assert_eq!(findings[0].kind, lifecycle::FindingKind::MissingHistory);
}

#[test]
fn unavailable_log_after_commit_is_an_audit_gap() {
  let (store, log, exec) = setup(AuditMode::Direct);
  store.insert(NewEpisode::for_patient("p").with_id("ep-nolog")).unwrap();
  log.set_available(false);

  let err = exec.apply_episode_transition(TransitionRequest::new("ep-nolog", "Lead.Qualified")).unwrap_err();
  match err {
    LifecycleError::AuditGap { outcome, reason, .. } => {
      assert!(outcome.changed);
      assert_eq!(outcome.next_state, EpisodeState::Triage);
      assert!(reason.contains("no disponible"), "{}", reason);
    }
    other => panic!("expected AuditGap, got {:?}", other),
  }
  log.set_available(true);
  assert_eq!(store.get("ep-nolog").unwrap().unwrap().state, EpisodeState::Triage);
  assert!(log.is_empty());
}

#[test]
fn boundary_request_tolerates_null_and_mistyped_context() {
  let (store, log, exec) = setup(AuditMode::Direct);
  seed_in(&store, "ep-null", EpisodeState::Intake);
  let req: TransitionRequest = serde_json::from_value(json!({
    "episodeId": "ep-null",
    "trigger": "Consent.Signed.Base",
    "context": null,
    "meta": null
  })).unwrap();
  assert_eq!(req.context, GuardContext::new());
  assert!(!exec.apply_episode_transition(req).unwrap().changed);

  // Un flag como texto no se interpreta: queda en `extra` y la guarda falla.
  let req: TransitionRequest = serde_json::from_value(json!({
    "episodeId": "ep-null",
    "trigger": "Consent.Signed.Base",
    "context": {"hasBaseConsent": "true"}
  })).unwrap();
  assert_eq!(req.context.extra["hasBaseConsent"], "true");
  let out = exec.apply_episode_transition(req).unwrap();
  assert_eq!(out.disposition, Disposition::GuardRejected);
  assert!(log.is_empty());
}

#[test]
fn expired_deadline_prevents_any_effect() {
  let (store, log, exec) = setup(AuditMode::Direct);
  store.insert(NewEpisode::for_patient("p").with_id("ep-late")).unwrap();
  let past = Instant::now() - Duration::from_millis(5);
  let err = exec.apply_episode_transition(TransitionRequest::new("ep-late", "Lead.Qualified").with_deadline(past))
                .unwrap_err();
  assert!(matches!(err, LifecycleError::DeadlineExceeded(_)));
  assert_eq!(store.get("ep-late").unwrap().unwrap().state, EpisodeState::LeadCapture);
  assert!(log.is_empty());

  let future = Instant::now() + Duration::from_secs(30);
  let out = exec.apply_episode_transition(TransitionRequest::new("ep-late", "Lead.Qualified").with_deadline(future))
                .unwrap();
  assert!(out.changed);
}

#[test]
fn request_parses_from_the_boundary_shape() {
  let (store, log, exec) = setup(AuditMode::Direct);
  seed_in(&store, "ep-json", EpisodeState::Intake);
  let req: TransitionRequest = serde_json::from_value(json!({
    "episodeId": "ep-json",
    "trigger": "Consent.Signed.Base",
    "actorUserId": "u-1",
    "context": {"hasBaseConsent": true},
    "meta": {"consentId": "c-9"}
  })).unwrap();
  let out = exec.apply_episode_transition(req).unwrap();
  assert_eq!(out.next_state, EpisodeState::Exploration);
  assert_eq!(log.all()[0].meta["consentId"], "c-9");
}
