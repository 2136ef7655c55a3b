// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un almacén de episodios (`InMemoryEpisodeStore`, que también hace
// de outbox) y un log de eventos (`InMemoryEventLog`). No son durables.
// Ambos permiten simular fallos para probar los caminos de error.
use crate::errors::{LifecycleError, Result};
use crate::repository::{DecideFn, EpisodeStore, EventLog, OutboxStore};
use care_domain::{now_millis, CanonicalEvent, Episode, NewEpisode, Subject};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Helper para mapear `Mutex::lock()` a `LifecycleError::Storage`.
fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|e| LifecycleError::Storage(format!("mutex poisoned: {:?}", e)))
}

#[derive(Debug, Clone)]
struct OutboxRow {
    event: CanonicalEvent,
    relayed: bool,
}

/// Almacén de episodios en memoria.
///
/// Cada episodio vive tras su propio `Mutex`: `transact` lo mantiene tomado
/// durante lectura, decisión y escritura, así que dos transacciones sobre el
/// mismo episodio se serializan y la segunda observa el estado ya escrito.
pub struct InMemoryEpisodeStore {
    episodes: DashMap<String, Arc<Mutex<Episode>>>,
    outbox: Mutex<Vec<OutboxRow>>,
    available: AtomicBool,
}

impl InMemoryEpisodeStore {
    /// Crea un almacén vacío y disponible.
    pub fn new() -> Self {
        Self { episodes: DashMap::new(), outbox: Mutex::new(Vec::new()), available: AtomicBool::new(true) }
    }

    /// Simula un almacén no inicializado/inalcanzable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Inserta un episodio tal cual (útil para sembrar estados intermedios).
    pub fn put(&self, episode: Episode) {
        self.episodes.insert(episode.id.clone(), Arc::new(Mutex::new(episode)));
    }

    /// Cantidad de filas del outbox aún sin trasladar.
    pub fn pending_count(&self) -> usize {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner()).iter().filter(|r| !r.relayed).count()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LifecycleError::Configuration("almacén de episodios no disponible".into()))
        }
    }

    fn handle(&self, episode_id: &str) -> Option<Arc<Mutex<Episode>>> {
        // Se clona el Arc para no retener el shard del DashMap mientras se
        // espera el lock del episodio.
        self.episodes.get(episode_id).map(|e| e.value().clone())
    }
}

impl Default for InMemoryEpisodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EpisodeStore for InMemoryEpisodeStore {
    /// Crea el episodio en el estado inicial. Falla si el id ya existe.
    fn insert(&self, new_episode: NewEpisode) -> Result<Episode> {
        self.ensure_available()?;
        let episode = new_episode.into_episode(now_millis())?;
        match self.episodes.entry(episode.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LifecycleError::Storage(format!("episodio {} ya existe", episode.id)))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(Arc::new(Mutex::new(episode.clone())));
                Ok(episode)
            }
        }
    }

    fn get(&self, episode_id: &str) -> Result<Option<Episode>> {
        self.ensure_available()?;
        let Some(handle) = self.handle(episode_id) else {
            return Ok(None);
        };
        let episode = lock(&handle)?.clone();
        Ok(Some(episode))
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        let mut ids: Vec<String> = self.episodes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    /// Transacción sobre un episodio: el lock del episodio hace de
    /// aislamiento. La fila de outbox se escribe antes que el estado para
    /// que un fallo no deje el estado cambiado sin su fila.
    fn transact(&self, episode_id: &str, decide: &mut DecideFn<'_>) -> Result<Episode> {
        self.ensure_available()?;
        let handle = self.handle(episode_id)
                         .ok_or_else(|| LifecycleError::NotFound(format!("episodio {}", episode_id)))?;
        let mut episode = lock(&handle)?;
        let before = episode.clone();
        if let Some(write) = decide(&before) {
            if let Some(event) = write.outbox {
                lock(&self.outbox)?.push(OutboxRow { event, relayed: false });
            }
            episode.state = write.state;
            episode.updated_at = write.updated_at;
        }
        Ok(before)
    }
}

impl OutboxStore for InMemoryEpisodeStore {
    fn pending(&self, limit: usize) -> Result<Vec<CanonicalEvent>> {
        self.ensure_available()?;
        Ok(lock(&self.outbox)?.iter().filter(|r| !r.relayed).take(limit).map(|r| r.event.clone()).collect())
    }

    fn mark_relayed(&self, event_id: &Uuid) -> Result<()> {
        self.ensure_available()?;
        let mut rows = lock(&self.outbox)?;
        if let Some(row) = rows.iter_mut().find(|r| &r.event.id == event_id) {
            row.relayed = true;
        }
        Ok(())
    }
}

/// Log de eventos en memoria. El orden del `Vec` es el orden de inserción.
pub struct InMemoryEventLog {
    events: Mutex<Vec<CanonicalEvent>>,
    available: AtomicBool,
    reject_appends: AtomicBool,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self { events: Mutex::new(Vec::new()), available: AtomicBool::new(true), reject_appends: AtomicBool::new(false) }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Hace fallar los `append` siguientes (las lecturas siguen funcionando).
    pub fn set_reject_appends(&self, reject: bool) {
        self.reject_appends.store(reject, Ordering::SeqCst);
    }

    /// Copia de todos los eventos en orden de inserción.
    pub fn all(&self) -> Vec<CanonicalEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LifecycleError::Configuration("log de eventos no disponible".into()))
        }
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, event: &CanonicalEvent) -> Result<()> {
        self.ensure_available()?;
        if self.reject_appends.load(Ordering::SeqCst) {
            return Err(LifecycleError::Storage(format!("append rechazado para evento {}", event.id)));
        }
        let mut events = lock(&self.events)?;
        if events.iter().any(|e| e.id == event.id) {
            return Ok(());
        }
        events.push(event.clone());
        Ok(())
    }

    fn get(&self, event_id: &Uuid) -> Result<Option<CanonicalEvent>> {
        self.ensure_available()?;
        Ok(lock(&self.events)?.iter().find(|e| &e.id == event_id).cloned())
    }

    /// Filtra por sujeto y ordena por timestamp; `sort_by_key` es estable,
    /// así que los empates mantienen el orden de inserción.
    fn list_for_subject(&self, subject: &Subject) -> Result<Vec<CanonicalEvent>> {
        self.ensure_available()?;
        let mut out: Vec<CanonicalEvent> = lock(&self.events)?.iter().filter(|e| &e.subject == subject).cloned().collect();
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }
}
