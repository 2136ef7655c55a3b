// Archivo: episode_persistence.rs
// Propósito: almacén Diesel de episodios. También guarda el outbox
// transaccional, porque sus filas deben escribirse en la misma transacción
// que el cambio de estado.
use crate::connection::{build_pool, checkout, serializable, DbConn, DbPool, PersistenceConfig, TxError};
use crate::schema;
use crate::schema::episode_outbox::dsl as ob_dsl;
use crate::schema::episodes::dsl as ep_dsl;
use care_domain::{now_millis, CanonicalEvent, Episode, EpisodeState, NewEpisode};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use lifecycle::{DecideFn, EpisodeStore, LifecycleError, OutboxStore, Result};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::episodes)]
struct EpisodeRow {
  pub id: String,
  pub patient_id: String,
  pub state: String,
  pub updated_at: i64,
  pub started_at: i64,
  pub reason: Option<String>,
  pub owner_user_id: Option<String>,
  pub closed_at: Option<i64>,
  pub discharge_reason: Option<String>,
}

impl EpisodeRow {
  fn from_episode(ep: &Episode) -> Self {
    EpisodeRow { id: ep.id.clone(),
                 patient_id: ep.patient_id.clone(),
                 state: ep.state.as_str().to_string(),
                 updated_at: ep.updated_at,
                 started_at: ep.started_at,
                 reason: ep.reason.clone(),
                 owner_user_id: ep.owner_user_id.clone(),
                 closed_at: ep.closed_at,
                 discharge_reason: ep.discharge_reason.clone() }
  }

  fn into_episode(self) -> std::result::Result<Episode, TxError> {
    let state = EpisodeState::from_str(&self.state).map_err(|e| TxError::Corrupt(format!("episodio {}: {}", self.id, e)))?;
    Ok(Episode { id: self.id,
                 patient_id: self.patient_id,
                 state,
                 updated_at: self.updated_at,
                 started_at: self.started_at,
                 reason: self.reason,
                 owner_user_id: self.owner_user_id,
                 closed_at: self.closed_at,
                 discharge_reason: self.discharge_reason })
  }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::episode_outbox)]
struct OutboxRow {
  pub id: String,
  pub seq: i64,
  pub episode_id: String,
  pub payload: String,
  pub created_at: i64,
  pub relayed_at: Option<i64>,
}

/// Repo Diesel que implementa `EpisodeStore` y `OutboxStore`.
pub struct DieselEpisodeStore {
  pool: Arc<DbPool>,
}

impl DieselEpisodeStore {
  /// Crea el pool y aplica migraciones.
  pub fn connect(config: &PersistenceConfig) -> Result<Self> {
    Ok(Self::with_pool(build_pool(config)?))
  }

  pub(crate) fn with_pool(pool: Arc<DbPool>) -> Self {
    DieselEpisodeStore { pool }
  }

  /// Filas del outbox aún sin trasladar.
  pub fn pending_count(&self) -> Result<i64> {
    let mut conn = checkout(&self.pool)?;
    ob_dsl::episode_outbox.filter(ob_dsl::relayed_at.is_null())
                          .count()
                          .get_result::<i64>(&mut conn)
                          .map_err(|e| LifecycleError::Storage(format!("db: {}", e)))
  }
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(|e| LifecycleError::Storage(format!("db: {}", e)))
}

fn write_outbox(conn: &mut DbConn, episode_id: &str, event: &CanonicalEvent) -> std::result::Result<(), TxError> {
  let last: Option<i64> = ob_dsl::episode_outbox.select(diesel::dsl::max(ob_dsl::seq)).first(conn)?;
  let row = OutboxRow { id: event.id.to_string(),
                        seq: last.unwrap_or(0) + 1,
                        episode_id: episode_id.to_string(),
                        payload: serde_json::to_string(event)?,
                        created_at: event.timestamp,
                        relayed_at: None };
  diesel::insert_into(ob_dsl::episode_outbox).values(&row).execute(conn)?;
  Ok(())
}

impl EpisodeStore for DieselEpisodeStore {
  fn insert(&self, new_episode: NewEpisode) -> Result<Episode> {
    let episode = new_episode.into_episode(now_millis())?;
    let mut conn = checkout(&self.pool)?;
    match diesel::insert_into(ep_dsl::episodes).values(&EpisodeRow::from_episode(&episode)).execute(&mut conn) {
      Ok(_) => Ok(episode),
      Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
        Err(LifecycleError::Storage(format!("episodio {} ya existe", episode.id)))
      }
      Err(e) => Err(LifecycleError::Storage(format!("db: {}", e))),
    }
  }

  fn get(&self, episode_id: &str) -> Result<Option<Episode>> {
    let mut conn = checkout(&self.pool)?;
    let row = map_db_err(ep_dsl::episodes.filter(ep_dsl::id.eq(episode_id))
                                         .first::<EpisodeRow>(&mut conn)
                                         .optional())?;
    match row {
      Some(r) => Ok(Some(r.into_episode()?)),
      None => Ok(None),
    }
  }

  fn list_ids(&self) -> Result<Vec<String>> {
    let mut conn = checkout(&self.pool)?;
    map_db_err(ep_dsl::episodes.select(ep_dsl::id).order(ep_dsl::id.asc()).load::<String>(&mut conn))
  }

  /// Lee, decide y escribe dentro de una transacción serializable
  /// (`BEGIN IMMEDIATE` en SQLite). Los conflictos de serialización se
  /// reintentan desde la lectura.
  fn transact(&self, episode_id: &str, decide: &mut DecideFn<'_>) -> Result<Episode> {
    let mut conn = checkout(&self.pool)?;
    let before = serializable(&mut conn, |c| {
      let row = ep_dsl::episodes.filter(ep_dsl::id.eq(episode_id))
                                .first::<EpisodeRow>(c)
                                .optional()?
                                .ok_or_else(|| TxError::NotFound(format!("episodio {}", episode_id)))?;
      let episode = row.into_episode()?;
      if let Some(write) = decide(&episode) {
        // La fila de outbox va primero: si falla, el estado no cambia.
        if let Some(event) = &write.outbox {
          write_outbox(c, episode_id, event)?;
        }
        diesel::update(ep_dsl::episodes.filter(ep_dsl::id.eq(episode_id)))
          .set((ep_dsl::state.eq(write.state.as_str()), ep_dsl::updated_at.eq(write.updated_at)))
          .execute(c)?;
      }
      Ok(episode)
    })?;
    Ok(before)
  }
}

impl OutboxStore for DieselEpisodeStore {
  fn pending(&self, limit: usize) -> Result<Vec<CanonicalEvent>> {
    let mut conn = checkout(&self.pool)?;
    let rows = map_db_err(ob_dsl::episode_outbox.filter(ob_dsl::relayed_at.is_null())
                                                .order(ob_dsl::seq.asc())
                                                .limit(i64::try_from(limit).unwrap_or(i64::MAX))
                                                .load::<OutboxRow>(&mut conn))?;
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
      out.push(serde_json::from_str::<CanonicalEvent>(&r.payload)?);
    }
    Ok(out)
  }

  fn mark_relayed(&self, event_id: &Uuid) -> Result<()> {
    let mut conn = checkout(&self.pool)?;
    map_db_err(diesel::update(ob_dsl::episode_outbox.filter(ob_dsl::id.eq(event_id.to_string()))
                                                    .filter(ob_dsl::relayed_at.is_null()))
               .set(ob_dsl::relayed_at.eq(Some(now_millis())))
               .execute(&mut conn))?;
    Ok(())
  }
}
