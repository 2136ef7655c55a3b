// Archivo: config.rs
// Propósito: configuración del motor (modo de auditoría) leída desde el
// entorno o construida explícitamente.
use crate::errors::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const AUDIT_MODE_VAR: &str = "CAREFLOW_AUDIT_MODE";

/// Cómo se registra el evento de un cambio de estado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
  /// Commit del estado y después append al log. Un fallo entre ambos deja
  /// un cambio sin evento (se reporta como `AuditGap`).
  #[default]
  Direct,
  /// Fila pendiente escrita en la misma transacción; `OutboxRelay` la pasa
  /// al log después.
  Outbox,
}

impl fmt::Display for AuditMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AuditMode::Direct => f.write_str("direct"),
      AuditMode::Outbox => f.write_str("outbox"),
    }
  }
}

impl FromStr for AuditMode {
  type Err = LifecycleError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "" | "direct" => Ok(AuditMode::Direct),
      "outbox" => Ok(AuditMode::Outbox),
      other => Err(LifecycleError::Configuration(format!("{} inválido: {}", AUDIT_MODE_VAR, other))),
    }
  }
}

/// Configuración del ejecutor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
  pub audit_mode: AuditMode,
}

impl LifecycleConfig {
  pub fn with_audit_mode(audit_mode: AuditMode) -> Self {
    Self { audit_mode }
  }

  /// Lee `.env` (si existe) y `CAREFLOW_AUDIT_MODE`. Sin variable se usa
  /// `direct`.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let audit_mode = match std::env::var(AUDIT_MODE_VAR) {
      Ok(v) => v.parse()?,
      Err(_) => AuditMode::default(),
    };
    Ok(Self { audit_mode })
  }
}
