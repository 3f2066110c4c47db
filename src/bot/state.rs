use crate::session::{FlowPhase, FlowState};
use crate::sources::{Album, Movie};

/// Represents the current state of the user dialogue
#[derive(Clone, Debug, Default)]
pub enum State {
    /// Main menu, no flow running
    #[default]
    Start,
    /// Discogs new-releases flow
    Music(FlowPhase<Album>),
    /// Waiting for the title a recommendation is built from
    VideoAwaitingTitle,
    /// Kinopoisk recommendation flow
    Video(FlowPhase<Movie>),
}

impl FlowState<Album> for State {
    fn lift(phase: FlowPhase<Album>) -> Self {
        match phase {
            FlowPhase::Idle => Self::Start,
            phase => Self::Music(phase),
        }
    }

    fn phase(&self) -> Option<&FlowPhase<Album>> {
        match self {
            Self::Music(phase) => Some(phase),
            _ => None,
        }
    }
}

// A finished or failed recommendation returns to the title prompt.
impl FlowState<Movie> for State {
    fn lift(phase: FlowPhase<Movie>) -> Self {
        match phase {
            FlowPhase::Idle => Self::VideoAwaitingTitle,
            phase => Self::Video(phase),
        }
    }

    fn phase(&self) -> Option<&FlowPhase<Movie>> {
        match self {
            Self::Video(phase) => Some(phase),
            _ => None,
        }
    }
}
