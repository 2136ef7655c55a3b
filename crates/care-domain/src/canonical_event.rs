// canonical_event.rs
use crate::{DomainError, EpisodeState, Trigger};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Tipo de evento emitido en cada cambio de estado confirmado.
pub const EPISODE_STATE_CHANGED: &str = "Episode.StateChanged";

/// Entidad sobre la que trata un evento.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
  pub kind: String,
  pub id: String,
}

impl Subject {
  pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
    Self { kind: kind.into(), id: id.into() }
  }

  pub fn episode(id: impl Into<String>) -> Self {
    Self::new("episode", id)
  }
}

/// Hecho inmutable del log de auditoría. El `id` lo asigna el log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
  pub id: Uuid,
  #[serde(rename = "type")]
  pub event_type: String,
  pub subject: Subject,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub actor_user_id: Option<String>,
  #[serde(default)]
  pub meta: Map<String, JsonValue>,
  pub timestamp: i64,
}

impl CanonicalEvent {
  /// Interpreta `meta` como metadatos de cambio de estado, si lo es.
  pub fn state_change(&self) -> Option<StateChangedMeta> {
    if self.event_type != EPISODE_STATE_CHANGED {
      return None;
    }
    StateChangedMeta::from_meta(&self.meta).ok()
  }
}

/// Carga útil de `emitEvent`: todo menos el `id`; `timestamp` es opcional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
  #[serde(rename = "type")]
  pub event_type: String,
  pub subject: Subject,
  #[serde(default)]
  pub actor_user_id: Option<String>,
  #[serde(default)]
  pub meta: Map<String, JsonValue>,
  #[serde(default)]
  pub timestamp: Option<i64>,
}

impl NewEvent {
  pub fn new(event_type: impl Into<String>, subject: Subject) -> Self {
    Self { event_type: event_type.into(), subject, actor_user_id: None, meta: Map::new(), timestamp: None }
  }

  pub fn with_actor(mut self, actor_user_id: Option<String>) -> Self {
    self.actor_user_id = actor_user_id;
    self
  }

  pub fn with_meta(mut self, meta: Map<String, JsonValue>) -> Self {
    self.meta = meta;
    self
  }

  pub fn at(mut self, timestamp: i64) -> Self {
    self.timestamp = Some(timestamp);
    self
  }

  /// Completa el registro con el id generado y, si falta, la hora de append.
  pub fn into_event(self, id: Uuid, now: i64) -> CanonicalEvent {
    CanonicalEvent { id,
                     event_type: self.event_type,
                     subject: self.subject,
                     actor_user_id: self.actor_user_id,
                     meta: self.meta,
                     timestamp: self.timestamp.unwrap_or(now) }
  }
}

/// Metadatos tipados de `Episode.StateChanged`.
///
/// Se serializa como un mapa plano: `from`, `to`, `trigger` más los campos
/// extra del llamador. Las claves reservadas prevalecen sobre las del
/// llamador con el mismo nombre.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangedMeta {
  pub from: EpisodeState,
  pub to: EpisodeState,
  pub trigger: Trigger,
  pub extra: Map<String, JsonValue>,
}

impl StateChangedMeta {
  pub fn into_meta(self) -> Map<String, JsonValue> {
    let mut meta = self.extra;
    meta.insert("from".into(), JsonValue::String(self.from.as_str().into()));
    meta.insert("to".into(), JsonValue::String(self.to.as_str().into()));
    meta.insert("trigger".into(), JsonValue::String(self.trigger.as_str().into()));
    meta
  }

  pub fn from_meta(meta: &Map<String, JsonValue>) -> Result<Self, DomainError> {
    let field = |k: &str| {
      meta.get(k)
          .and_then(|v| v.as_str())
          .ok_or_else(|| DomainError::ValidationError(format!("meta.{} ausente o no es texto", k)))
    };
    let from = field("from")?.parse::<EpisodeState>()?;
    let to = field("to")?.parse::<EpisodeState>()?;
    let trigger_name = field("trigger")?;
    let trigger = Trigger::parse(trigger_name).ok_or_else(|| {
                                                DomainError::ValidationError(format!("trigger desconocido: {}",
                                                                                     trigger_name))
                                              })?;
    let extra = meta.iter()
                    .filter(|(k, _)| !matches!(k.as_str(), "from" | "to" | "trigger"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
    Ok(Self { from, to, trigger, extra })
  }
}
