// episode_state.rs
use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Etapas del ciclo de vida de un episodio de atención.
///
/// El orden de declaración es el orden de progresión previsto. La tabla de
/// transiciones es quien realmente decide qué movimientos son válidos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeState {
  LeadCapture,
  Triage,
  Scheduling,
  Intake,
  Exploration,
  Diagnosis,
  Plan,
  Quote,
  Treatment,
  FollowUp,
  Discharge,
  Maintenance,
}

impl EpisodeState {
  pub const ALL: [EpisodeState; 12] = [EpisodeState::LeadCapture,
                                       EpisodeState::Triage,
                                       EpisodeState::Scheduling,
                                       EpisodeState::Intake,
                                       EpisodeState::Exploration,
                                       EpisodeState::Diagnosis,
                                       EpisodeState::Plan,
                                       EpisodeState::Quote,
                                       EpisodeState::Treatment,
                                       EpisodeState::FollowUp,
                                       EpisodeState::Discharge,
                                       EpisodeState::Maintenance];

  /// Estado en el que nace todo episodio.
  pub const INITIAL: EpisodeState = EpisodeState::LeadCapture;

  pub fn as_str(&self) -> &'static str {
    match self {
      EpisodeState::LeadCapture => "LEAD_CAPTURE",
      EpisodeState::Triage => "TRIAGE",
      EpisodeState::Scheduling => "SCHEDULING",
      EpisodeState::Intake => "INTAKE",
      EpisodeState::Exploration => "EXPLORATION",
      EpisodeState::Diagnosis => "DIAGNOSIS",
      EpisodeState::Plan => "PLAN",
      EpisodeState::Quote => "QUOTE",
      EpisodeState::Treatment => "TREATMENT",
      EpisodeState::FollowUp => "FOLLOW_UP",
      EpisodeState::Discharge => "DISCHARGE",
      EpisodeState::Maintenance => "MAINTENANCE",
    }
  }

  /// `MAINTENANCE` es la única etapa sin arista de salida.
  pub fn is_terminal(&self) -> bool {
    matches!(self, EpisodeState::Maintenance)
  }
}

impl fmt::Display for EpisodeState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EpisodeState {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    EpisodeState::ALL.iter()
                     .copied()
                     .find(|st| st.as_str() == s)
                     .ok_or_else(|| DomainError::ValidationError(format!("Estado de episodio desconocido: {}", s)))
  }
}
