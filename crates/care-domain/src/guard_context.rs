// guard_context.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Estado de un presupuesto tal como lo reporta el flujo de cotización.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
  Draft,
  Pending,
  Accepted,
  Rejected,
  Expired,
  #[serde(other)]
  Unknown,
}

/// Hechos aportados por el llamador para evaluar guardas en una transición.
///
/// No se persiste. En la frontera conserva la forma de bolsa de atributos
/// (`{"hasBaseConsent": true, "quoteStatus": "ACCEPTED", ...}`): los campos
/// conocidos se tipan y el resto queda en `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardContext {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub has_base_consent: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub has_specific_consent: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub quote_status: Option<QuoteStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub treatment_controlled: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub discharge_ready: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub recall_scheduled: Option<bool>,
  #[serde(flatten)]
  pub extra: Map<String, JsonValue>,
}

impl GuardContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Construye el contexto desde un objeto JSON sin fallar nunca.
  ///
  /// Una clave conocida con un tipo inesperado (p. ej. `"true"` como texto)
  /// no se interpreta: el campo tipado queda vacío y el valor crudo pasa a
  /// `extra`, de modo que la guarda correspondiente no se satisface.
  pub fn from_json(value: &JsonValue) -> Self {
    let mut ctx = GuardContext::default();
    let Some(obj) = value.as_object() else {
      return ctx;
    };
    for (k, v) in obj {
      let typed = match k.as_str() {
        "hasBaseConsent" => v.as_bool().map(|b| ctx.has_base_consent = Some(b)),
        "hasSpecificConsent" => v.as_bool().map(|b| ctx.has_specific_consent = Some(b)),
        "treatmentControlled" => v.as_bool().map(|b| ctx.treatment_controlled = Some(b)),
        "dischargeReady" => v.as_bool().map(|b| ctx.discharge_ready = Some(b)),
        "recallScheduled" => v.as_bool().map(|b| ctx.recall_scheduled = Some(b)),
        "quoteStatus" => v.as_str()
                          .and_then(|s| serde_json::from_value::<QuoteStatus>(JsonValue::String(s.to_string())).ok())
                          .map(|q| ctx.quote_status = Some(q)),
        _ => None,
      };
      if typed.is_none() {
        ctx.extra.insert(k.clone(), v.clone());
      }
    }
    ctx
  }

  pub fn with_base_consent(mut self, signed: bool) -> Self {
    self.has_base_consent = Some(signed);
    self
  }

  pub fn with_specific_consent(mut self, signed: bool) -> Self {
    self.has_specific_consent = Some(signed);
    self
  }

  pub fn with_quote_status(mut self, status: QuoteStatus) -> Self {
    self.quote_status = Some(status);
    self
  }

  pub fn with_treatment_controlled(mut self, controlled: bool) -> Self {
    self.treatment_controlled = Some(controlled);
    self
  }

  pub fn with_discharge_ready(mut self, ready: bool) -> Self {
    self.discharge_ready = Some(ready);
    self
  }

  pub fn with_recall_scheduled(mut self, scheduled: bool) -> Self {
    self.recall_scheduled = Some(scheduled);
    self
  }

  // Un booleano omitido cuenta como falso.
  pub fn base_consent(&self) -> bool {
    self.has_base_consent == Some(true)
  }

  pub fn specific_consent(&self) -> bool {
    self.has_specific_consent == Some(true)
  }

  pub fn quote_accepted(&self) -> bool {
    self.quote_status == Some(QuoteStatus::Accepted)
  }

  pub fn treatment_is_controlled(&self) -> bool {
    self.treatment_controlled == Some(true)
  }

  pub fn discharge_is_ready(&self) -> bool {
    self.discharge_ready == Some(true)
  }

  pub fn recall_is_scheduled(&self) -> bool {
    self.recall_scheduled == Some(true)
  }
}
