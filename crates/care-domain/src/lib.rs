mod canonical_event;
mod episode;
mod episode_state;
mod errors;
mod guard_context;
mod trigger;

pub use canonical_event::{CanonicalEvent, NewEvent, StateChangedMeta, Subject, EPISODE_STATE_CHANGED};
pub use episode::{now_millis, Episode, NewEpisode};
pub use episode_state::EpisodeState;
pub use errors::DomainError;
pub use guard_context::{GuardContext, QuoteStatus};
pub use trigger::Trigger;
