//! Crate `lifecycle`: motor de ciclo de vida de episodios de atención.
//!
//! Contiene la tabla de transiciones (pura), los contratos de persistencia
//! (`EpisodeStore`, `EventLog`, `OutboxStore`), el ejecutor transaccional de
//! transiciones, el cliente del log de eventos canónicos, el relé del outbox
//! y una conciliación de auditoría. `stubs` ofrece implementaciones en
//! memoria para pruebas y wiring rápido.
//!
//! Flujo de una transición:
//! - transacción sobre el episodio: leer, consultar la tabla, escribir si cambia
//! - tras el commit (modo `Direct`) se añade un `Episode.StateChanged` al log
//! - en modo `Outbox` el evento pendiente se escribe en la misma transacción
//!   y `OutboxRelay` lo traslada al log más tarde
//!
//! Ejemplo rápido:
//! ```rust
//! use care_domain::NewEpisode;
//! use lifecycle::stubs::{InMemoryEpisodeStore, InMemoryEventLog};
//! use lifecycle::{EpisodeStore, LifecycleConfig, TransitionExecutor, TransitionRequest};
//! use std::sync::Arc;
//! let store = Arc::new(InMemoryEpisodeStore::new());
//! let log = Arc::new(InMemoryEventLog::new());
//! let ep = store.insert(NewEpisode::for_patient("p-1")).unwrap();
//! let exec = TransitionExecutor::new(store, log, LifecycleConfig::default());
//! let out = exec.apply_episode_transition(TransitionRequest::new(ep.id, "Lead.Qualified")).unwrap();
//! assert!(out.changed);
//! ```
pub mod audit;
pub mod config;
pub mod engine;
pub mod errors;
pub mod event_log;
pub mod relay;
pub mod repository;
pub mod stubs;
pub mod transition_table;

pub use audit::{reconcile, AuditFinding, FindingKind};
pub use config::{AuditMode, LifecycleConfig};
pub use engine::{TransitionExecutor, TransitionOutcome, TransitionRequest};
pub use errors::*;
pub use event_log::EventLogClient;
pub use relay::{OutboxRelay, RelayReport};
pub use repository::*;
pub use transition_table::{get_next_state, Disposition, Edge, Guard, TransitionDecision, TransitionTable};
