// trigger.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ocurrencias de dominio que pueden hacer avanzar un episodio.
///
/// En la frontera (HTTP, scripts) llegan como texto; `Trigger::parse`
/// devuelve `None` para nombres desconocidos y el ejecutor lo trata como
/// "no hay arista" en lugar de error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
  #[serde(rename = "Lead.Qualified")]
  LeadQualified,
  #[serde(rename = "Triage.Routed")]
  TriageRouted,
  #[serde(rename = "Appointment.Confirmed")]
  AppointmentConfirmed,
  #[serde(rename = "Consent.Signed.Base")]
  ConsentSignedBase,
  #[serde(rename = "Exploration.Completed")]
  ExplorationCompleted,
  #[serde(rename = "Plan.Created")]
  PlanCreated,
  #[serde(rename = "Plan.Proposed")]
  PlanProposed,
  #[serde(rename = "Quote.Accepted")]
  QuoteAccepted,
  #[serde(rename = "Treatment.ControlReached")]
  TreatmentControlReached,
  #[serde(rename = "Episode.Closed")]
  EpisodeClosed,
  #[serde(rename = "Recall.Scheduled")]
  RecallScheduled,
}

impl Trigger {
  pub const ALL: [Trigger; 11] = [Trigger::LeadQualified,
                                  Trigger::TriageRouted,
                                  Trigger::AppointmentConfirmed,
                                  Trigger::ConsentSignedBase,
                                  Trigger::ExplorationCompleted,
                                  Trigger::PlanCreated,
                                  Trigger::PlanProposed,
                                  Trigger::QuoteAccepted,
                                  Trigger::TreatmentControlReached,
                                  Trigger::EpisodeClosed,
                                  Trigger::RecallScheduled];

  pub fn as_str(&self) -> &'static str {
    match self {
      Trigger::LeadQualified => "Lead.Qualified",
      Trigger::TriageRouted => "Triage.Routed",
      Trigger::AppointmentConfirmed => "Appointment.Confirmed",
      Trigger::ConsentSignedBase => "Consent.Signed.Base",
      Trigger::ExplorationCompleted => "Exploration.Completed",
      Trigger::PlanCreated => "Plan.Created",
      Trigger::PlanProposed => "Plan.Proposed",
      Trigger::QuoteAccepted => "Quote.Accepted",
      Trigger::TreatmentControlReached => "Treatment.ControlReached",
      Trigger::EpisodeClosed => "Episode.Closed",
      Trigger::RecallScheduled => "Recall.Scheduled",
    }
  }

  /// Nombre exacto (sensible a mayúsculas). Devuelve `None` si no existe.
  pub fn parse(name: &str) -> Option<Trigger> {
    Trigger::ALL.iter().copied().find(|t| t.as_str() == name)
  }
}

impl fmt::Display for Trigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
