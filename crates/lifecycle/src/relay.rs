// Archivo: relay.rs
// Propósito: trasladar las filas pendientes del outbox al log de eventos
// canónicos. Lo invoca un proceso aparte (CLI, tarea programada).
use crate::errors::Result;
use crate::event_log::EventLogClient;
use crate::repository::{EventLog, OutboxStore};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    /// Filas añadidas al log y marcadas en esta pasada.
    pub relayed: usize,
}

/// Relé del outbox transaccional.
///
/// Conserva el orden de escritura: ante el primer fallo se detiene y el
/// error se propaga; las filas restantes siguen pendientes para la próxima
/// pasada. Como el evento lleva su id desde el outbox, reintentar una fila
/// ya añadida pero no marcada no la duplica en el log.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    events: EventLogClient,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<dyn OutboxStore>, log: Arc<dyn EventLog>) -> Self {
        Self { outbox, events: EventLogClient::new(log) }
    }

    pub fn drain(&self, limit: usize) -> Result<RelayReport> {
        let mut report = RelayReport::default();
        for event in self.outbox.pending(limit)? {
            self.events.append_prepared(&event)?;
            self.outbox.mark_relayed(&event.id)?;
            report.relayed += 1;
            log::info!("outbox: evento {} trasladado ({}:{})", event.id, event.subject.kind, event.subject.id);
        }
        Ok(report)
    }
}
