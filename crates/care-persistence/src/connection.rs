// Archivo: connection.rs
// Propósito: pool r2d2 de conexiones Diesel, migraciones embebidas y el
// helper de transacciones serializables con reintento compartido por los
// repositorios.
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use lifecycle::LifecycleError;
use std::sync::Arc;
use thiserror::Error;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

/// Variable con la URL de la base de datos (`DATABASE_URL` como respaldo).
pub const DB_URL_VAR: &str = "CAREFLOW_DB_URL";
/// Tamaño máximo del pool.
pub const POOL_SIZE_VAR: &str = "CAREFLOW_DB_POOL_SIZE";
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Reintentos ante fallos de serialización antes de propagar el error.
const MAX_TX_ATTEMPTS: u32 = 5;

#[cfg(feature = "pg")]
pub(crate) type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
pub(crate) type DbConn = SqliteConnection;
pub(crate) type DbPool = Pool<ConnectionManager<DbConn>>;

/// Parámetros de conexión.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
  pub database_url: String,
  pub pool_size: u32,
}

impl PersistenceConfig {
  pub fn new(database_url: impl Into<String>) -> Self {
    Self { database_url: database_url.into(), pool_size: DEFAULT_POOL_SIZE }
  }

  pub fn with_pool_size(mut self, pool_size: u32) -> Self {
    self.pool_size = pool_size;
    self
  }

  /// Lee `CAREFLOW_DB_URL` (o `DATABASE_URL`) y `CAREFLOW_DB_POOL_SIZE`.
  /// Carga `.env` si existe.
  pub fn from_env() -> Result<Self, LifecycleError> {
    dotenvy::dotenv().ok();
    let url = std::env::var(DB_URL_VAR).or_else(|_| std::env::var("DATABASE_URL"))
                                       .map_err(|_| {
                                         LifecycleError::Configuration(format!("{} / DATABASE_URL no definida",
                                                                               DB_URL_VAR))
                                       })?;
    let pool_size = match std::env::var(POOL_SIZE_VAR) {
      Ok(raw) => raw.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(|| {
                                                                   LifecycleError::Configuration(format!("{} inválido: {:?}",
                                                                                                         POOL_SIZE_VAR,
                                                                                                         raw))
                                                                 })?,
      Err(_) => DEFAULT_POOL_SIZE,
    };
    let config = Self { database_url: url, pool_size };
    config.check_backend()?;
    Ok(config)
  }

  /// Rechaza URLs que no corresponden al backend compilado.
  pub fn check_backend(&self) -> Result<(), LifecycleError> {
    let l = self.database_url.to_lowercase();
    let looks_pg = l.starts_with("postgres://") || l.starts_with("postgresql://");
    if cfg!(feature = "pg") && !looks_pg {
      return Err(LifecycleError::Configuration(format!("{} no parece una URL de Postgres", DB_URL_VAR)));
    }
    if !cfg!(feature = "pg") && looks_pg {
      return Err(LifecycleError::Configuration("care-persistence se compiló sin la feature 'pg'; habilítala para \
                                                usar Postgres"
                                                              .into()));
    }
    Ok(())
  }
}

/// PRAGMAs por conexión: `busy_timeout` sólo aplica a la conexión que lo
/// ejecuta, así que se fija al adquirirla del pool.
#[cfg(not(feature = "pg"))]
#[derive(Debug)]
struct SqlitePragmas;

#[cfg(not(feature = "pg"))]
impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
    use diesel::connection::SimpleConnection;
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

#[cfg(feature = "pg")]
#[derive(Debug)]
struct NoCustomization;

#[cfg(feature = "pg")]
impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for NoCustomization {}

/// Construye el pool y aplica las migraciones pendientes.
pub(crate) fn build_pool(config: &PersistenceConfig) -> Result<Arc<DbPool>, LifecycleError> {
  let manager = ConnectionManager::<DbConn>::new(config.database_url.as_str());
  #[cfg(not(feature = "pg"))]
  let customizer = SqlitePragmas;
  #[cfg(feature = "pg")]
  let customizer = NoCustomization;
  let pool = Pool::builder().max_size(config.pool_size)
                            .connection_customizer(Box::new(customizer))
                            .build(manager)
                            .map_err(pool_err)?;
  let mut conn = pool.get().map_err(pool_err)?;
  conn.run_pending_migrations(MIGRATIONS)
      .map_err(|e| LifecycleError::Configuration(format!("migraciones: {}", e)))?;
  log::info!("persistencia lista (pool de {} conexiones)", config.pool_size);
  Ok(Arc::new(pool))
}

pub(crate) fn checkout(pool: &DbPool) -> Result<PooledConnection<ConnectionManager<DbConn>>, LifecycleError> {
  pool.get().map_err(pool_err)
}

/// Un pool que no se puede crear o que agota el tiempo de espera equivale a
/// un almacén inalcanzable.
fn pool_err(e: r2d2::Error) -> LifecycleError {
  LifecycleError::Configuration(format!("pool: {}", e))
}

/// Error interno de una transacción. Diesel necesita `From<DieselError>`
/// para poder hacer rollback con nuestro propio tipo.
#[derive(Debug, Error)]
pub(crate) enum TxError {
  #[error("db: {0}")]
  Db(#[from] DieselError),
  #[error("no encontrado: {0}")]
  NotFound(String),
  #[error("fila inválida: {0}")]
  Corrupt(String),
  #[error("serialización: {0}")]
  Encode(#[from] serde_json::Error),
}

impl From<TxError> for LifecycleError {
  fn from(e: TxError) -> Self {
    match e {
      TxError::Db(e) => LifecycleError::Storage(format!("db: {}", e)),
      TxError::NotFound(what) => LifecycleError::NotFound(what),
      TxError::Corrupt(what) => LifecycleError::Storage(format!("fila inválida: {}", what)),
      TxError::Encode(e) => LifecycleError::Serialization(e),
    }
  }
}

#[cfg(not(feature = "pg"))]
fn run_serializable<T>(conn: &mut DbConn,
                       body: &mut dyn FnMut(&mut DbConn) -> Result<T, TxError>)
                       -> Result<T, TxError> {
  // BEGIN IMMEDIATE toma el lock de escritura al abrir: en SQLite equivale a
  // serializar las transacciones de escritura.
  conn.immediate_transaction(|c| body(c))
}

#[cfg(feature = "pg")]
fn run_serializable<T>(conn: &mut DbConn,
                       body: &mut dyn FnMut(&mut DbConn) -> Result<T, TxError>)
                       -> Result<T, TxError> {
  conn.build_transaction().serializable().run(|c| body(c))
}

/// Ejecuta `body` en una transacción serializable y la repite ante
/// `SerializationFailure`. `body` debe poder ejecutarse más de una vez.
pub(crate) fn serializable<T, F>(conn: &mut DbConn, mut body: F) -> Result<T, TxError>
  where F: FnMut(&mut DbConn) -> Result<T, TxError>
{
  let mut attempt = 1;
  loop {
    match run_serializable(conn, &mut body) {
      Err(TxError::Db(DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _)))
        if attempt < MAX_TX_ATTEMPTS =>
      {
        log::debug!("conflicto de serialización, reintento {}", attempt);
        attempt += 1;
      }
      other => return other,
    }
  }
}
