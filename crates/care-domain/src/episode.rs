// episode.rs
use crate::{DomainError, EpisodeState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milisegundos desde epoch, la unidad de tiempo de todos los registros.
pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// Agregado raíz del recorrido de un paciente.
///
/// `state` sólo lo modifica el ejecutor de transiciones; el resto de campos
/// son descriptivos y no participan en la lógica de transición.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
  pub id: String,
  pub patient_id: String,
  pub state: EpisodeState,
  pub updated_at: i64,
  pub started_at: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner_user_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub closed_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub discharge_reason: Option<String>,
}

/// Datos que aporta la captación de leads al crear un episodio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEpisode {
  /// Identificador opaco; si falta se genera uno.
  #[serde(default)]
  pub id: Option<String>,
  pub patient_id: String,
  #[serde(default)]
  pub reason: Option<String>,
  #[serde(default)]
  pub owner_user_id: Option<String>,
}

impl NewEpisode {
  pub fn for_patient(patient_id: impl Into<String>) -> Self {
    Self { patient_id: patient_id.into(), ..Default::default() }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
    self.reason = Some(reason.into());
    self
  }

  pub fn with_owner(mut self, owner_user_id: impl Into<String>) -> Self {
    self.owner_user_id = Some(owner_user_id.into());
    self
  }

  /// Materializa el episodio en el estado inicial con `startedAt = updatedAt`.
  pub fn into_episode(self, now: i64) -> Result<Episode, DomainError> {
    if self.patient_id.trim().is_empty() {
      return Err(DomainError::ValidationError("patientId no puede estar vacío".to_string()));
    }
    let id = match self.id {
      Some(id) if id.trim().is_empty() => {
        return Err(DomainError::ValidationError("El id del episodio no puede estar vacío".to_string()))
      }
      Some(id) => id,
      None => Uuid::new_v4().to_string(),
    };
    Ok(Episode { id,
                 patient_id: self.patient_id,
                 state: EpisodeState::INITIAL,
                 updated_at: now,
                 started_at: now,
                 reason: self.reason,
                 owner_user_id: self.owner_user_id,
                 closed_at: None,
                 discharge_reason: None })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_episode_starts_in_lead_capture() {
    let ep = NewEpisode::for_patient("p-1").with_reason("dolor lumbar").into_episode(1_000).unwrap();
    assert_eq!(ep.state, EpisodeState::LeadCapture);
    assert_eq!(ep.started_at, 1_000);
    assert_eq!(ep.updated_at, 1_000);
    assert!(!ep.id.is_empty());
  }

  #[test]
  fn blank_patient_is_rejected() {
    assert!(NewEpisode::for_patient("  ").into_episode(0).is_err());
    assert!(NewEpisode::for_patient("p").with_id("").into_episode(0).is_err());
  }

  #[test]
  fn persisted_shape_is_camel_case() {
    let ep = NewEpisode::for_patient("p-9").with_id("ep-9").into_episode(5).unwrap();
    let v = serde_json::to_value(&ep).unwrap();
    assert_eq!(v["state"], "LEAD_CAPTURE");
    assert_eq!(v["patientId"], "p-9");
    assert_eq!(v["updatedAt"], 5);
    assert!(v.get("closedAt").is_none());
  }
}
