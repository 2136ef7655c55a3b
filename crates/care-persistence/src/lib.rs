//! Persistencia Diesel para el motor de episodios.
//!
//! Expone `DieselEpisodeStore` (episodios y outbox transaccional) y
//! `DieselEventLog` (log de eventos canónicos). Ambos comparten un pool r2d2;
//! SQLite es el backend por defecto y la feature `pg` cambia a Postgres.

mod connection;
mod episode_persistence;
mod event_persistence;
pub mod schema;

pub use connection::{PersistenceConfig, DB_URL_VAR, DEFAULT_POOL_SIZE, MIGRATIONS, POOL_SIZE_VAR};
pub use episode_persistence::DieselEpisodeStore;
pub use event_persistence::DieselEventLog;

use lifecycle::Result;
use std::sync::Arc;

/// Almacenes Diesel sobre un mismo pool.
#[derive(Clone)]
pub struct CarePersistence {
  pub episodes: Arc<DieselEpisodeStore>,
  pub events: Arc<DieselEventLog>,
}

impl CarePersistence {
  /// Abre el pool, aplica migraciones y construye ambos almacenes.
  pub fn connect(config: &PersistenceConfig) -> Result<Self> {
    config.check_backend()?;
    let pool = connection::build_pool(config)?;
    Ok(CarePersistence { episodes: Arc::new(DieselEpisodeStore::with_pool(pool.clone())),
                         events: Arc::new(DieselEventLog::with_pool(pool)) })
  }
}

/// Crear los almacenes desde las variables de entorno
/// (`CAREFLOW_DB_URL`/`DATABASE_URL`, `CAREFLOW_DB_POOL_SIZE`).
pub fn new_from_env() -> Result<CarePersistence> {
  CarePersistence::connect(&PersistenceConfig::from_env()?)
}
