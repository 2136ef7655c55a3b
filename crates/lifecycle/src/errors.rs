// Archivo: errors.rs
// Propósito: errores del motor de ciclo de vida y el alias Result<T> usado
// por las APIs del crate.
use crate::engine::TransitionOutcome;
use care_domain::DomainError;
use thiserror::Error;

/// Errores del motor de episodios.
///
/// Una guarda no satisfecha o un trigger desconocido NO son errores: se
/// devuelven como un resultado `changed = false`.
#[derive(Error, Debug)]
pub enum LifecycleError {
  /// Almacenamiento no inicializado o inalcanzable. Fatal, sin efectos.
  #[error("Error de configuración: {0}")]
  Configuration(String),
  /// El episodio referenciado no existe; la transacción se aborta.
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Error del almacenamiento propagado tal cual (BD, transacción, etc.).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  /// El plazo del llamador venció antes de abrir la transacción.
  #[error("Plazo vencido: {0}")]
  DeadlineExceeded(String),
  /// El cambio de estado ya está confirmado pero el evento no se registró.
  /// `outcome` describe la transición confirmada para que el llamador decida
  /// si reintenta el append, alerta o acepta el hueco.
  #[error("Hueco de auditoría en episodio {episode_id}: {reason}")]
  AuditGap {
    episode_id: String,
    outcome: Box<TransitionOutcome>,
    reason: String,
  },
  #[error("Error de dominio: {0}")]
  Domain(#[from] DomainError),
  #[error("Error de serialización: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, LifecycleError>;
