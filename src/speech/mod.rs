//! # Speech Output
//!
//! Turns AI responses into audible speech with at most one utterance playing.
//!
//! ## Module Structure:
//! - **scheduler**: the single-utterance policy, markup stripping, voice caching
//! - **voice**: voice descriptions and the ordered selection rules
//! - **command**: concrete synthesizers and voice discovery
//!
//! ## Rust Concepts:
//! - **Trait objects**: the scheduler holds a `Box<dyn SpeechSynthesizer>`, so
//!   tests swap in a recording fake and `speech.engine = "none"` swaps in a logger

pub mod command;
pub mod scheduler;
pub mod voice;

pub use command::{list_voices, synthesizer_from_config};
pub use scheduler::SpeechScheduler;
pub use voice::{selectors_from_config, Voice};

use crate::error::ClientResult;

/// A speech request, ready for the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Text with emphasis markers already removed
    pub text: String,
    /// `None` leaves the choice to the synthesizer
    pub voice: Option<Voice>,
    pub locale: String,
    pub rate: f32,
}

/// Something that can make sound from an [`Utterance`].
///
/// Implementations play one utterance at a time; `speak` replaces whatever is playing.
pub trait SpeechSynthesizer: Send {
    /// Start playback. Returns once playback has started, not when it ends.
    fn speak(&mut self, utterance: &Utterance) -> ClientResult<()>;

    /// Silence any playback right away. Does nothing when idle.
    fn cancel(&mut self);
}
