// Archivo: audit.rs
// Propósito: detectar episodios cuyo estado almacenado no coincide con el
// último `Episode.StateChanged` del log (la ventana commit-y-luego-log).
use crate::errors::Result;
use crate::repository::{EpisodeStore, EventLog};
use care_domain::{EpisodeState, Subject};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
  /// El episodio salió del estado inicial y el log no tiene ningún cambio.
  MissingHistory,
  /// El último `to` registrado difiere del estado almacenado.
  StateMismatch,
  /// El id no resuelve a ningún episodio.
  UnknownEpisode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFinding {
  pub episode_id: String,
  pub kind: FindingKind,
  pub stored_state: Option<EpisodeState>,
  pub last_logged_state: Option<EpisodeState>,
}

/// Compara estado y log para cada id. Con `AuditMode::Outbox` conviene
/// vaciar el outbox antes: las filas pendientes aparecen como hallazgos.
pub fn reconcile(store: &dyn EpisodeStore, events: &dyn EventLog, episode_ids: &[String]) -> Result<Vec<AuditFinding>> {
  let mut findings = Vec::new();
  for id in episode_ids {
    let Some(episode) = store.get(id)? else {
      findings.push(AuditFinding { episode_id: id.clone(),
                                   kind: FindingKind::UnknownEpisode,
                                   stored_state: None,
                                   last_logged_state: None });
      continue;
    };
    let last_logged = events.list_for_subject(&Subject::episode(id.clone()))?
                         .iter()
                         .filter_map(|ev| ev.state_change())
                         .last()
                         .map(|m| m.to);
    let kind = match last_logged {
      None if episode.state != EpisodeState::INITIAL => Some(FindingKind::MissingHistory),
      Some(to) if to != episode.state => Some(FindingKind::StateMismatch),
      _ => None,
    };
    if let Some(kind) = kind {
      log::warn!("auditoría: episodio {} en {} con último evento {:?}", id, episode.state, last_logged);
      findings.push(AuditFinding { episode_id: id.clone(),
                                   kind,
                                   stored_state: Some(episode.state),
                                   last_logged_state: last_logged });
    }
  }
  Ok(findings)
}
