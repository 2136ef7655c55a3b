// Archivo: engine.rs
// Propósito: implementar el `TransitionExecutor`, que aplica un trigger a un
// episodio dentro de una transacción del almacén y registra el resultado
// en el log de eventos canónicos.
use crate::config::{AuditMode, LifecycleConfig};
use crate::errors::{LifecycleError, Result};
use crate::event_log::EventLogClient;
use crate::repository::{EpisodeStore, EpisodeWrite, EventLog};
use crate::transition_table::{Disposition, TransitionDecision, TransitionTable};
use care_domain::{now_millis, Episode, EpisodeState, GuardContext, NewEvent, StateChangedMeta, Subject, Trigger,
                  EPISODE_STATE_CHANGED};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Entrada de `applyEpisodeTransition`.
///
/// `trigger` llega como texto de frontera; un nombre desconocido produce un
/// no-op, no un error. `deadline` es opcional y se comprueba antes de abrir
/// la transacción y antes del append del evento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub episode_id: String,
    pub trigger: String,
    #[serde(default)]
    pub actor_user_id: Option<String>,
    /// Se interpreta con `GuardContext::from_json`: `null` o ausente es un
    /// contexto vacío y un valor de tipo inesperado no satisface la guarda.
    #[serde(default, deserialize_with = "lenient_context")]
    pub context: GuardContext,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub meta: Map<String, JsonValue>,
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

fn lenient_context<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<GuardContext, D::Error> {
    let raw = Option::<JsonValue>::deserialize(d)?;
    Ok(raw.map(|v| GuardContext::from_json(&v)).unwrap_or_default())
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Map<String, JsonValue>, D::Error> {
    Ok(Option::<Map<String, JsonValue>>::deserialize(d)?.unwrap_or_default())
}

impl TransitionRequest {
    pub fn new(episode_id: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self { episode_id: episode_id.into(),
               trigger: trigger.into(),
               actor_user_id: None,
               context: GuardContext::default(),
               meta: Map::new(),
               deadline: None }
    }

    pub fn of(episode_id: impl Into<String>, trigger: Trigger) -> Self {
        Self::new(episode_id, trigger.as_str())
    }

    pub fn by(mut self, actor_user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(actor_user_id.into());
        self
    }

    pub fn with_context(mut self, context: GuardContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_meta(mut self, meta: Map<String, JsonValue>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Resultado de una transición.
///
/// `changed`, `previous_state` y `next_state` son el contrato externo;
/// `disposition` sólo distingue "guarda rechazada" de "no hay arista" para
/// diagnóstico. `event_id` es el evento registrado (modo directo) o la fila
/// pendiente del outbox (modo outbox) cuando `changed` es verdadero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub changed: bool,
    pub previous_state: EpisodeState,
    pub next_state: EpisodeState,
    pub disposition: Disposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
}

impl TransitionOutcome {
    fn unchanged(state: EpisodeState, disposition: Disposition) -> Self {
        Self { changed: false, previous_state: state, next_state: state, disposition, event_id: None }
    }
}

/// Ejecutor de transiciones.
///
/// Responsabilidades:
/// - abrir la transacción del episodio, leer, consultar la tabla y escribir
///   `{state, updatedAt}` sólo si el destino difiere del estado actual
/// - tras el commit, registrar un `Episode.StateChanged` (o, en modo outbox,
///   dejarlo escrito en la misma transacción)
///
/// No reintenta ni decide cuándo disparar un trigger; la concurrencia sobre
/// un mismo episodio la resuelve la transacción del almacén.
pub struct TransitionExecutor {
    store: Arc<dyn EpisodeStore>,
    events: EventLogClient,
    table: TransitionTable,
    config: LifecycleConfig,
}

impl TransitionExecutor {
    /// Crea el ejecutor inyectando el almacén de episodios y el log.
    pub fn new(store: Arc<dyn EpisodeStore>, log: Arc<dyn EventLog>, config: LifecycleConfig) -> Self {
        Self { store, events: EventLogClient::new(log), table: TransitionTable::standard(), config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn events(&self) -> &EventLogClient {
        &self.events
    }

    /// `applyEpisodeTransition`.
    ///
    /// Errores:
    /// - `NotFound` si el episodio no existe (sin escritura ni evento)
    /// - `Configuration`/`Storage` del almacén, propagados sin modificar
    /// - `DeadlineExceeded` si el plazo venció antes de la transacción
    /// - `AuditGap` si el estado se confirmó pero el evento no pudo añadirse
    pub fn apply_episode_transition(&self, req: TransitionRequest) -> Result<TransitionOutcome> {
        if expired(req.deadline) {
            return Err(LifecycleError::DeadlineExceeded(format!("transición {} sobre episodio {}",
                                                                req.trigger, req.episode_id)));
        }

        let outbox = self.config.audit_mode == AuditMode::Outbox;
        let mut decision: Option<TransitionDecision> = None;
        let mut pending_id: Option<Uuid> = None;
        let mut now = 0;

        let before: Episode = self.store.transact(&req.episode_id, &mut |episode: &Episode| {
                                  let d = self.table.evaluate(episode.state, &req.trigger, &req.context);
                                  decision = Some(d);
                                  pending_id = None;
                                  let next = d.target.filter(|next| *next != episode.state)?;
                                  // La marca se toma ya dentro de la transacción: nunca es anterior
                                  // a la de un commit previo del mismo episodio.
                                  now = now_millis().max(episode.updated_at);
                                  let pending = if outbox {
                                      let ev = state_changed_event(&req, episode.state, next)?.into_event(Uuid::new_v4(),
                                                                                                          now);
                                      pending_id = Some(ev.id);
                                      Some(ev)
                                  } else {
                                      None
                                  };
                                  Some(EpisodeWrite { state: next, updated_at: now, outbox: pending })
                              })?;

        let decision = decision.unwrap_or(TransitionDecision { disposition: Disposition::NoSuchEdge, target: None });
        let next = match decision.target {
            Some(next) if next != before.state => next,
            _ => {
                let disposition = match decision.disposition {
                    Disposition::Transitioned => Disposition::NoSuchEdge,
                    other => other,
                };
                log::debug!("episodio {}: {} sin efecto en {} ({:?})",
                            before.id, req.trigger, before.state, disposition);
                return Ok(TransitionOutcome::unchanged(before.state, disposition));
            }
        };

        let mut outcome = TransitionOutcome { changed: true,
                                              previous_state: before.state,
                                              next_state: next,
                                              disposition: Disposition::Transitioned,
                                              event_id: pending_id };
        log::info!("episodio {}: {} -> {} por {}", before.id, before.state, next, req.trigger);

        if outbox {
            return Ok(outcome);
        }

        // El commit ya ocurrió: a partir de aquí un fallo es un hueco de
        // auditoría, no un rollback.
        if expired(req.deadline) {
            return Err(audit_gap(&req.episode_id, outcome, "plazo vencido antes del append".into()));
        }
        let payload = match state_changed_event(&req, before.state, next) {
            Some(p) => p.at(now),
            None => return Err(audit_gap(&req.episode_id, outcome, "trigger no reconocido".into())),
        };
        match self.events.emit_event(payload) {
            Ok(id) => {
                outcome.event_id = Some(id);
                Ok(outcome)
            }
            Err(e) => Err(audit_gap(&req.episode_id, outcome, e.to_string())),
        }
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn audit_gap(episode_id: &str, outcome: TransitionOutcome, reason: String) -> LifecycleError {
    log::warn!("episodio {}: cambio {} -> {} confirmado sin evento: {}",
               episode_id, outcome.previous_state, outcome.next_state, reason);
    LifecycleError::AuditGap { episode_id: episode_id.to_string(), outcome: Box::new(outcome), reason }
}

// `None` sólo si el trigger no es uno conocido, lo que no ocurre cuando hubo
// transición.
fn state_changed_event(req: &TransitionRequest, from: EpisodeState, to: EpisodeState) -> Option<NewEvent> {
    let trigger = Trigger::parse(&req.trigger)?;
    let meta = StateChangedMeta { from, to, trigger, extra: req.meta.clone() }.into_meta();
    Some(NewEvent::new(EPISODE_STATE_CHANGED, Subject::episode(req.episode_id.clone())).with_actor(req.actor_user_id
                                                                                                       .clone())
                                                                                       .with_meta(meta))
}
