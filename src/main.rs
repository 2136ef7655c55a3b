use care_domain::{GuardContext, NewEpisode, QuoteStatus, Subject, Trigger};
use care_persistence::CarePersistence;
use clap::{Parser, Subcommand};
use lifecycle::stubs::{InMemoryEpisodeStore, InMemoryEventLog};
use lifecycle::{reconcile, AuditMode, EpisodeStore, EventLog, LifecycleConfig, LifecycleError, OutboxRelay,
                OutboxStore, TransitionExecutor, TransitionRequest, TransitionTable};
use serde_json::{Map, Value as JsonValue};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI para operar episodios de atención sobre la base configurada
/// (`CAREFLOW_DB_URL`) o en memoria (`--in-memory`).
#[derive(Parser)]
#[command(name = "careflow", version, about = "Motor de ciclo de vida de episodios de atención")]
struct Cli {
  /// Usa almacenes en memoria (nada se conserva al salir).
  #[arg(long, global = true)]
  in_memory: bool,

  /// Sobrescribe CAREFLOW_AUDIT_MODE (direct | outbox).
  #[arg(long, global = true)]
  audit_mode: Option<AuditMode>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Crea un episodio en LEAD_CAPTURE.
  Seed {
    #[arg(long)]
    patient: String,
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    reason: Option<String>,
    #[arg(long)]
    owner: Option<String>,
  },
  /// Dispara un trigger sobre un episodio.
  Fire {
    episode_id: String,
    trigger: String,
    #[arg(long)]
    actor: Option<String>,
    /// Contexto de guardas en JSON, p. ej. '{"hasBaseConsent": true}'.
    #[arg(long)]
    context: Option<String>,
    /// Metadatos extra del evento en JSON.
    #[arg(long)]
    meta: Option<String>,
    /// Plazo de la operación en milisegundos.
    #[arg(long)]
    timeout_ms: Option<u64>,
  },
  /// Muestra un episodio.
  Show { episode_id: String },
  /// Lista los eventos canónicos de un episodio.
  Events { episode_id: String },
  /// Lleva un episodio hasta MAINTENANCE con contextos que satisfacen cada guarda.
  Drive {
    episode_id: String,
    #[arg(long)]
    actor: Option<String>,
  },
  /// Traslada filas pendientes del outbox al log.
  Relay {
    #[arg(long, default_value_t = 100)]
    limit: usize,
  },
  /// Compara estado almacenado y log (todos los episodios si no se indican ids).
  Reconcile { episode_ids: Vec<String> },
  /// Imprime la tabla de transiciones.
  Table,
}

struct Backend {
  store: Arc<dyn EpisodeStore>,
  log: Arc<dyn EventLog>,
  outbox: Arc<dyn OutboxStore>,
}

impl Backend {
  fn open(in_memory: bool) -> Result<Self, LifecycleError> {
    if in_memory {
      let store = Arc::new(InMemoryEpisodeStore::new());
      return Ok(Backend { store: store.clone(), log: Arc::new(InMemoryEventLog::new()), outbox: store });
    }
    let stores = care_persistence::new_from_env()?;
    let CarePersistence { episodes, events } = stores;
    Ok(Backend { store: episodes.clone(), log: events, outbox: episodes })
  }
}

fn init_logging() {
  // tracing-subscriber también recoge los registros del facade `log`.
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let _ = tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                                        .with(filter)
                                        .try_init();
}

fn parse_object(raw: Option<&str>, what: &str) -> Result<Map<String, JsonValue>, Box<dyn Error>> {
  match raw {
    None => Ok(Map::new()),
    Some(s) => match serde_json::from_str::<JsonValue>(s)? {
      JsonValue::Object(m) => Ok(m),
      other => Err(format!("{} debe ser un objeto JSON, se recibió {}", what, other).into()),
    },
  }
}

/// Contexto que satisface la guarda de `trigger`.
fn satisfying_context(trigger: Trigger) -> GuardContext {
  match trigger {
    Trigger::ConsentSignedBase => GuardContext::new().with_base_consent(true),
    Trigger::QuoteAccepted => GuardContext::new().with_specific_consent(true).with_quote_status(QuoteStatus::Accepted),
    Trigger::TreatmentControlReached => GuardContext::new().with_treatment_controlled(true),
    Trigger::EpisodeClosed => GuardContext::new().with_discharge_ready(true),
    Trigger::RecallScheduled => GuardContext::new().with_recall_scheduled(true),
    _ => GuardContext::new(),
  }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
  init_logging();
  let cli = Cli::parse();

  let mut config = LifecycleConfig::from_env()?;
  if let Some(mode) = cli.audit_mode {
    config.audit_mode = mode;
  }
  let backend = Backend::open(cli.in_memory)?;
  let exec = TransitionExecutor::new(backend.store.clone(), backend.log.clone(), config);

  match cli.command {
    Command::Seed { patient, id, reason, owner } => {
      let mut new_episode = NewEpisode::for_patient(patient);
      new_episode.id = id;
      new_episode.reason = reason;
      new_episode.owner_user_id = owner;
      print_json(&backend.store.insert(new_episode)?)?;
    }
    Command::Fire { episode_id, trigger, actor, context, meta, timeout_ms } => {
      let context = GuardContext::from_json(&JsonValue::Object(parse_object(context.as_deref(), "--context")?));
      let mut req = TransitionRequest::new(episode_id, trigger).with_context(context)
                                                               .with_meta(parse_object(meta.as_deref(), "--meta")?);
      if let Some(actor) = actor {
        req = req.by(actor);
      }
      if let Some(ms) = timeout_ms {
        req = req.with_deadline(Instant::now() + Duration::from_millis(ms));
      }
      match exec.apply_episode_transition(req) {
        Ok(outcome) => print_json(&outcome)?,
        Err(LifecycleError::AuditGap { episode_id, outcome, reason }) => {
          // El estado ya cambió; se informa el resultado y se sale con error.
          log::warn!("hueco de auditoría en {}; ejecutar `reconcile` para localizarlo", episode_id);
          print_json(&outcome)?;
          return Err(format!("episodio {} cambió de estado sin evento: {}", episode_id, reason).into());
        }
        Err(e) => return Err(e.into()),
      }
    }
    Command::Show { episode_id } => match backend.store.get(&episode_id)? {
      Some(ep) => print_json(&ep)?,
      None => return Err(format!("episodio {} no existe", episode_id).into()),
    },
    Command::Events { episode_id } => {
      print_json(&exec.events().history(&Subject::episode(episode_id))?)?;
    }
    Command::Drive { episode_id, actor } => {
      let table = TransitionTable::standard();
      loop {
        let Some(ep) = backend.store.get(&episode_id)? else {
          return Err(format!("episodio {} no existe", episode_id).into());
        };
        let Some(trigger) = table.allowed_trigger(ep.state) else {
          break;
        };
        let mut req = TransitionRequest::of(episode_id.clone(), trigger).with_context(satisfying_context(trigger));
        if let Some(actor) = &actor {
          req = req.by(actor.clone());
        }
        let out = exec.apply_episode_transition(req)?;
        println!("{} --{}--> {}", out.previous_state, trigger, out.next_state);
        if !out.changed {
          break;
        }
      }
    }
    Command::Relay { limit } => {
      let relay = OutboxRelay::new(backend.outbox.clone(), backend.log.clone());
      print_json(&relay.drain(limit)?)?;
    }
    Command::Reconcile { episode_ids } => {
      let ids = if episode_ids.is_empty() { backend.store.list_ids()? } else { episode_ids };
      let findings = reconcile(backend.store.as_ref(), backend.log.as_ref(), &ids)?;
      print_json(&findings)?;
    }
    Command::Table => {
      for edge in TransitionTable::standard().edges() {
        let guard = edge.guard.map(|g| format!("{:?}", g)).unwrap_or_else(|| "-".into());
        println!("{:<12} {:<26} {:<22} {}", edge.from.as_str(), edge.trigger.as_str(), guard, edge.to);
      }
    }
  }
  Ok(())
}
