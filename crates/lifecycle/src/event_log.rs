// Archivo: event_log.rs
// Propósito: cliente del log de eventos canónicos. Asigna id y timestamp y
// delega en `EventLog::append` (una única escritura por registro).
use crate::errors::Result;
use crate::repository::EventLog;
use care_domain::{now_millis, CanonicalEvent, DomainError, NewEvent, Subject};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct EventLogClient {
    log: Arc<dyn EventLog>,
}

impl EventLogClient {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    /// `emitEvent`: genera el id, fija el timestamp si el llamador no lo
    /// hizo, añade el registro y devuelve el id.
    pub fn emit_event(&self, payload: NewEvent) -> Result<Uuid> {
        if payload.event_type.trim().is_empty() {
            return Err(DomainError::ValidationError("El tipo de evento no puede estar vacío".into()).into());
        }
        if payload.subject.kind.trim().is_empty() || payload.subject.id.trim().is_empty() {
            return Err(DomainError::ValidationError("subject.kind y subject.id son obligatorios".into()).into());
        }
        let event = payload.into_event(Uuid::new_v4(), now_millis());
        self.log.append(&event)?;
        log::debug!("evento {} {} registrado para {}:{}",
                    event.event_type, event.id, event.subject.kind, event.subject.id);
        Ok(event.id)
    }

    /// Añade un evento ya completo (id y timestamp fijados), p. ej. desde el
    /// outbox.
    pub fn append_prepared(&self, event: &CanonicalEvent) -> Result<()> {
        self.log.append(event)
    }

    pub fn get(&self, event_id: &Uuid) -> Result<Option<CanonicalEvent>> {
        self.log.get(event_id)
    }

    /// Historial ordenado de un sujeto.
    pub fn history(&self, subject: &Subject) -> Result<Vec<CanonicalEvent>> {
        self.log.list_for_subject(subject)
    }
}
