// Archivo: repository.rs
// Propósito: contratos que deben implementar las persistencias (Diesel,
// en memoria, etc.) para el almacén de episodios, el log de eventos
// canónicos y el outbox transaccional.
use crate::errors::Result;
use care_domain::{CanonicalEvent, Episode, EpisodeState, NewEpisode, Subject};
use uuid::Uuid;

/// Escritura que el ejecutor pide dentro de la transacción del episodio.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeWrite {
    pub state: EpisodeState,
    pub updated_at: i64,
    /// Evento pendiente a escribir en el outbox en la misma transacción
    /// (sólo en modo `AuditMode::Outbox`).
    pub outbox: Option<CanonicalEvent>,
}

/// Decisión tomada con el episodio leído dentro de la transacción.
/// `None` significa "no escribir" (commit de una transacción vacía).
pub type DecideFn<'a> = dyn FnMut(&Episode) -> Option<EpisodeWrite> + 'a;

/// Acceso al agregado `Episode`.
pub trait EpisodeStore: Send + Sync {
    /// Crea un episodio en el estado inicial (lo usa la captación de leads).
    fn insert(&self, new_episode: NewEpisode) -> Result<Episode>;

    /// Lectura fuera de transacción.
    fn get(&self, episode_id: &str) -> Result<Option<Episode>>;

    /// Identificadores de todos los episodios (para conciliación).
    fn list_ids(&self) -> Result<Vec<String>>;

    /// Abre una transacción serializable sobre `episode_id`, lee el episodio,
    /// llama a `decide` y aplica la escritura devuelta (estado, `updatedAt` y,
    /// si viene, la fila de outbox) antes del commit.
    ///
    /// Devuelve el episodio tal como se leyó. Si no existe se aborta con
    /// `LifecycleError::NotFound` sin invocar `decide`. Una implementación
    /// puede reintentar la transacción ante fallos de serialización, por lo
    /// que `decide` debe ser puro respecto del episodio recibido.
    fn transact(&self, episode_id: &str, decide: &mut DecideFn<'_>) -> Result<Episode>;
}

/// Log de eventos canónicos: sólo append.
pub trait EventLog: Send + Sync {
    /// Añade un registro completo en una sola escritura. Si ya existe un
    /// evento con el mismo `id` no se duplica (el relé puede reintentar).
    fn append(&self, event: &CanonicalEvent) -> Result<()>;

    fn get(&self, event_id: &Uuid) -> Result<Option<CanonicalEvent>>;

    /// Eventos de un sujeto ordenados por `timestamp` y, en empate, por orden
    /// de inserción.
    fn list_for_subject(&self, subject: &Subject) -> Result<Vec<CanonicalEvent>>;
}

/// Filas pendientes escritas junto con el cambio de estado.
pub trait OutboxStore: Send + Sync {
    /// Eventos aún no trasladados al log, en orden de escritura.
    fn pending(&self, limit: usize) -> Result<Vec<CanonicalEvent>>;

    /// Marca una fila como trasladada. Marcar dos veces no es error.
    fn mark_relayed(&self, event_id: &Uuid) -> Result<()>;
}
