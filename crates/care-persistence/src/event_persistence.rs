// Archivo: event_persistence.rs
// Propósito: log de eventos canónicos sobre Diesel. Sólo inserta; nunca
// actualiza ni borra filas.
use crate::connection::{build_pool, checkout, serializable, DbPool, PersistenceConfig};
use crate::schema;
use crate::schema::canonical_events::dsl as ev_dsl;
use care_domain::{CanonicalEvent, Subject};
use diesel::prelude::*;
use lifecycle::{EventLog, LifecycleError, Result};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::canonical_events)]
struct EventRow {
  pub id: String,
  pub seq: i64,
  pub event_type: String,
  pub subject_kind: String,
  pub subject_id: String,
  pub actor_user_id: Option<String>,
  pub meta: String,
  pub occurred_at: i64,
}

impl EventRow {
  fn into_event(self) -> Result<CanonicalEvent> {
    let id = Uuid::parse_str(&self.id).map_err(|e| LifecycleError::Storage(format!("uuid inválido {}: {}", self.id, e)))?;
    let meta: Map<String, JsonValue> = serde_json::from_str(&self.meta)?;
    Ok(CanonicalEvent { id,
                        event_type: self.event_type,
                        subject: Subject::new(self.subject_kind, self.subject_id),
                        actor_user_id: self.actor_user_id,
                        meta,
                        timestamp: self.occurred_at })
  }
}

/// Repo Diesel que implementa `EventLog`.
pub struct DieselEventLog {
  pool: Arc<DbPool>,
}

impl DieselEventLog {
  pub fn connect(config: &PersistenceConfig) -> Result<Self> {
    Ok(Self::with_pool(build_pool(config)?))
  }

  pub(crate) fn with_pool(pool: Arc<DbPool>) -> Self {
    DieselEventLog { pool }
  }

  /// Número total de eventos registrados.
  pub fn count(&self) -> Result<i64> {
    let mut conn = checkout(&self.pool)?;
    ev_dsl::canonical_events.count()
                            .get_result::<i64>(&mut conn)
                            .map_err(|e| LifecycleError::Storage(format!("db: {}", e)))
  }
}

impl EventLog for DieselEventLog {
  /// Una única inserción por evento. `seq` se asigna dentro de la misma
  /// transacción para conservar el orden de llegada.
  fn append(&self, event: &CanonicalEvent) -> Result<()> {
    let mut conn = checkout(&self.pool)?;
    let meta = serde_json::to_string(&event.meta)?;
    let id_s = event.id.to_string();
    serializable(&mut conn, |c| {
      let exists = ev_dsl::canonical_events.filter(ev_dsl::id.eq(&id_s))
                                           .select(ev_dsl::id)
                                           .first::<String>(c)
                                           .optional()?;
      if exists.is_some() {
        log::debug!("evento {} ya registrado, se omite", id_s);
        return Ok(());
      }
      let last: Option<i64> = ev_dsl::canonical_events.select(diesel::dsl::max(ev_dsl::seq)).first(c)?;
      let row = EventRow { id: id_s.clone(),
                           seq: last.unwrap_or(0) + 1,
                           event_type: event.event_type.clone(),
                           subject_kind: event.subject.kind.clone(),
                           subject_id: event.subject.id.clone(),
                           actor_user_id: event.actor_user_id.clone(),
                           meta: meta.clone(),
                           occurred_at: event.timestamp };
      diesel::insert_into(ev_dsl::canonical_events).values(&row).execute(c)?;
      Ok(())
    })?;
    Ok(())
  }

  fn get(&self, event_id: &Uuid) -> Result<Option<CanonicalEvent>> {
    let mut conn = checkout(&self.pool)?;
    let row = ev_dsl::canonical_events.filter(ev_dsl::id.eq(event_id.to_string()))
                                      .first::<EventRow>(&mut conn)
                                      .optional()
                                      .map_err(|e| LifecycleError::Storage(format!("db: {}", e)))?;
    row.map(EventRow::into_event).transpose()
  }

  fn list_for_subject(&self, subject: &Subject) -> Result<Vec<CanonicalEvent>> {
    let mut conn = checkout(&self.pool)?;
    let rows = ev_dsl::canonical_events.filter(ev_dsl::subject_kind.eq(&subject.kind))
                                       .filter(ev_dsl::subject_id.eq(&subject.id))
                                       .order((ev_dsl::occurred_at.asc(), ev_dsl::seq.asc()))
                                       .load::<EventRow>(&mut conn)
                                       .map_err(|e| LifecycleError::Storage(format!("db: {}", e)))?;
    rows.into_iter().map(EventRow::into_event).collect()
  }
}
