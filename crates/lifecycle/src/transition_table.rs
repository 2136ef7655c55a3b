// Archivo: transition_table.rs
// Propósito: tabla declarativa (estado, trigger) -> (destino, guarda). Pura,
// sin I/O y determinista.
use care_domain::{EpisodeState, GuardContext, Trigger};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Predicados evaluados sobre el `GuardContext` del llamador.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
  /// `hasBaseConsent == true`
  BaseConsentSigned,
  /// `hasSpecificConsent == true && quoteStatus == "ACCEPTED"`
  SpecificConsentAndQuoteAccepted,
  /// `treatmentControlled == true`
  TreatmentControlled,
  /// `dischargeReady == true`
  DischargeReady,
  /// `recallScheduled == true`
  RecallScheduled,
}

impl Guard {
  pub fn evaluate(&self, ctx: &GuardContext) -> bool {
    match self {
      Guard::BaseConsentSigned => ctx.base_consent(),
      Guard::SpecificConsentAndQuoteAccepted => ctx.specific_consent() && ctx.quote_accepted(),
      Guard::TreatmentControlled => ctx.treatment_is_controlled(),
      Guard::DischargeReady => ctx.discharge_is_ready(),
      Guard::RecallScheduled => ctx.recall_is_scheduled(),
    }
  }
}

/// Arista de salida de un estado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
  pub from: EpisodeState,
  pub trigger: Trigger,
  pub guard: Option<Guard>,
  pub to: EpisodeState,
}

/// Por qué una evaluación produjo (o no) una transición.
///
/// `GuardRejected` y `NoSuchEdge` son observacionalmente idénticos para el
/// llamador (`changed = false`); la distinción sólo sirve para diagnóstico.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
  Transitioned,
  GuardRejected,
  NoSuchEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionDecision {
  pub disposition: Disposition,
  pub target: Option<EpisodeState>,
}

impl TransitionDecision {
  fn no_edge() -> Self {
    Self { disposition: Disposition::NoSuchEdge, target: None }
  }
}

// Cada estado tiene como mucho una arista de salida; se indexa por origen y
// se conserva el orden de declaración.
static EDGES: Lazy<IndexMap<EpisodeState, Edge>> = Lazy::new(|| {
  use EpisodeState::*;
  let edges = [Edge { from: LeadCapture, trigger: Trigger::LeadQualified, guard: None, to: Triage },
               Edge { from: Triage, trigger: Trigger::TriageRouted, guard: None, to: Scheduling },
               Edge { from: Scheduling, trigger: Trigger::AppointmentConfirmed, guard: None, to: Intake },
               Edge { from: Intake,
                      trigger: Trigger::ConsentSignedBase,
                      guard: Some(Guard::BaseConsentSigned),
                      to: Exploration },
               Edge { from: Exploration, trigger: Trigger::ExplorationCompleted, guard: None, to: Diagnosis },
               Edge { from: Diagnosis, trigger: Trigger::PlanCreated, guard: None, to: Plan },
               Edge { from: Plan, trigger: Trigger::PlanProposed, guard: None, to: Quote },
               Edge { from: Quote,
                      trigger: Trigger::QuoteAccepted,
                      guard: Some(Guard::SpecificConsentAndQuoteAccepted),
                      to: Treatment },
               Edge { from: Treatment,
                      trigger: Trigger::TreatmentControlReached,
                      guard: Some(Guard::TreatmentControlled),
                      to: FollowUp },
               Edge { from: FollowUp,
                      trigger: Trigger::EpisodeClosed,
                      guard: Some(Guard::DischargeReady),
                      to: Discharge },
               Edge { from: Discharge,
                      trigger: Trigger::RecallScheduled,
                      guard: Some(Guard::RecallScheduled),
                      to: Maintenance }];
  edges.into_iter().map(|e| (e.from, e)).collect()
});

/// Tabla de transiciones del episodio. Sin estado: todas las instancias
/// consultan la misma tabla estática.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionTable;

impl TransitionTable {
  pub fn standard() -> Self {
    TransitionTable
  }

  /// Todas las aristas en orden de progresión.
  pub fn edges(&self) -> impl Iterator<Item = &'static Edge> {
    EDGES.values()
  }

  pub fn edge_from(&self, state: EpisodeState) -> Option<&'static Edge> {
    EDGES.get(&state)
  }

  /// Trigger que puede hacer salir a `state`, si lo hay.
  pub fn allowed_trigger(&self, state: EpisodeState) -> Option<Trigger> {
    self.edge_from(state).map(|e| e.trigger)
  }

  /// Evalúa un trigger tipado contra el estado actual y el contexto.
  pub fn evaluate_trigger(&self, state: EpisodeState, trigger: Trigger, ctx: &GuardContext) -> TransitionDecision {
    match self.edge_from(state) {
      Some(edge) if edge.trigger == trigger => {
        if edge.guard.map_or(true, |g| g.evaluate(ctx)) {
          TransitionDecision { disposition: Disposition::Transitioned, target: Some(edge.to) }
        } else {
          TransitionDecision { disposition: Disposition::GuardRejected, target: None }
        }
      }
      _ => TransitionDecision::no_edge(),
    }
  }

  /// Igual que `evaluate_trigger` pero con el nombre de frontera. Un nombre
  /// desconocido es simplemente "no hay arista".
  pub fn evaluate(&self, state: EpisodeState, trigger: &str, ctx: &GuardContext) -> TransitionDecision {
    match Trigger::parse(trigger) {
      Some(t) => self.evaluate_trigger(state, t, ctx),
      None => TransitionDecision::no_edge(),
    }
  }

  pub fn get_next_state(&self, state: EpisodeState, trigger: &str, ctx: &GuardContext) -> Option<EpisodeState> {
    self.evaluate(state, trigger, ctx).target
  }
}

/// `getNextState(currentState, trigger, context)`: destino sólo si existe la
/// arista y su guarda se cumple; `None` en cualquier otro caso. Nunca falla.
pub fn get_next_state(state: EpisodeState, trigger: &str, ctx: &GuardContext) -> Option<EpisodeState> {
  TransitionTable::standard().get_next_state(state, trigger, ctx)
}

#[cfg(test)]
mod tests {
  use super::*;
  use care_domain::QuoteStatus;

  #[test]
  fn table_is_a_chain_through_every_state() {
    let table = TransitionTable::standard();
    let edges: Vec<_> = table.edges().collect();
    assert_eq!(edges.len(), 11);
    for (i, e) in edges.iter().enumerate() {
      assert_eq!(e.from, EpisodeState::ALL[i]);
      assert_eq!(e.to, EpisodeState::ALL[i + 1]);
    }
    assert!(table.edge_from(EpisodeState::Maintenance).is_none());
  }

  #[test]
  fn each_trigger_owns_exactly_one_edge() {
    let table = TransitionTable::standard();
    for t in Trigger::ALL {
      assert_eq!(table.edges().filter(|e| e.trigger == t).count(), 1, "{}", t);
    }
  }

  #[test]
  fn quote_guard_needs_both_facts() {
    let g = Guard::SpecificConsentAndQuoteAccepted;
    let ok = GuardContext::new().with_specific_consent(true).with_quote_status(QuoteStatus::Accepted);
    assert!(g.evaluate(&ok));
    assert!(!g.evaluate(&GuardContext::new().with_quote_status(QuoteStatus::Accepted)));
    assert!(!g.evaluate(&GuardContext::new().with_specific_consent(true)));
    assert!(!g.evaluate(&ok.clone().with_quote_status(QuoteStatus::Pending)));
  }

  #[test]
  fn dispositions_distinguish_guard_from_missing_edge() {
    let table = TransitionTable::standard();
    let empty = GuardContext::new();
    let d = table.evaluate(EpisodeState::Intake, "Consent.Signed.Base", &empty);
    assert_eq!(d.disposition, Disposition::GuardRejected);
    assert_eq!(d.target, None);
    let d = table.evaluate(EpisodeState::Intake, "Lead.Qualified", &empty);
    assert_eq!(d.disposition, Disposition::NoSuchEdge);
    let d = table.evaluate(EpisodeState::Intake, "Consent.Signed.Typo", &empty);
    assert_eq!(d.disposition, Disposition::NoSuchEdge);
  }
}
