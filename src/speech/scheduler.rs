//! # Speech Output Scheduler
//!
//! ## Playback Policy:
//! - `speak` always cancels first, so "A" then "B" never overlap and only "B" is heard
//! - `cancel` is called by the router whenever the user starts a new turn
//!
//! ## Voice Readiness:
//! Voices arrive asynchronously. Until they do, utterances use the synthesizer's
//! default voice. The first `on_voices_ready` runs the selection rules once and
//! caches the result for later utterances. It does not touch the utterance that
//! is already playing, so nothing is spoken twice.

use super::voice::{select_voice, Voice, VoiceSelector};
use super::{SpeechSynthesizer, Utterance};
use crate::config::SpeechConfig;
use crate::error::{ClientError, ClientResult};
use regex::Regex;
use tracing::{debug, info};

/// Markdown emphasis delimiters removed before synthesis.
const EMPHASIS_PATTERN: &str = r"(\*\*|__|\*|_)";

pub struct SpeechScheduler {
    synthesizer: Box<dyn SpeechSynthesizer>,
    selectors: Vec<VoiceSelector>,
    emphasis: Regex,
    locale: String,
    rate: f32,
    voices_ready: bool,
    voice: Option<Voice>,
    current: Option<Utterance>,
}

impl SpeechScheduler {
    pub fn new(
        synthesizer: Box<dyn SpeechSynthesizer>,
        selectors: Vec<VoiceSelector>,
        config: &SpeechConfig,
    ) -> ClientResult<Self> {
        let emphasis = Regex::new(EMPHASIS_PATTERN)
            .map_err(|e| ClientError::Speech(format!("Invalid emphasis pattern: {}", e)))?;

        Ok(Self {
            synthesizer,
            selectors,
            emphasis,
            locale: config.locale.clone(),
            rate: config.rate,
            voices_ready: false,
            voice: None,
            current: None,
        })
    }

    /// Remove emphasis markers (`**`, `__`, `*`, `_`).
    pub fn strip_emphasis(&self, text: &str) -> String {
        self.emphasis.replace_all(text, "").into_owned()
    }

    /// Replace whatever is playing with `text`.
    ///
    /// Text that is empty after stripping only cancels.
    pub fn speak(&mut self, text: &str) -> ClientResult<()> {
        self.cancel();

        let clean = self.strip_emphasis(text);
        if clean.trim().is_empty() {
            return Ok(());
        }

        let utterance = Utterance {
            text: clean,
            voice: self.voice.clone(),
            locale: self.locale.clone(),
            rate: self.rate,
        };
        self.synthesizer.speak(&utterance)?;
        debug!(
            voice = utterance.voice.as_ref().map(|v| v.name.as_str()).unwrap_or("default"),
            "Utterance started"
        );
        self.current = Some(utterance);
        Ok(())
    }

    /// Silence playback now.
    pub fn cancel(&mut self) {
        self.synthesizer.cancel();
        if let Some(cancelled) = self.current.take() {
            debug!(chars = cancelled.text.len(), "Utterance cancelled");
        }
    }

    /// Voice list became available. Only the first call has any effect.
    pub fn on_voices_ready(&mut self, voices: &[Voice]) {
        if self.voices_ready {
            debug!("Voice list already applied, ignoring update");
            return;
        }
        self.voices_ready = true;
        self.voice = select_voice(&self.selectors, voices).cloned();

        info!(
            available = voices.len(),
            selected = self.voice.as_ref().map(|v| v.name.as_str()).unwrap_or("platform default"),
            "Voices ready"
        );
    }

    #[cfg(test)]
    pub fn selected_voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    /// The utterance most recently started, unless cancelled since.
    #[cfg(test)]
    pub fn current_utterance(&self) -> Option<&Utterance> {
        self.current.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// What a recording synthesizer observed, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SpeechCall {
        Speak(String, Option<String>),
        Cancel,
    }

    /// Records calls and tracks which utterance would be audible.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSynthesizer {
        pub calls: Arc<Mutex<Vec<SpeechCall>>>,
        pub audible: Arc<Mutex<Option<String>>>,
    }

    impl SpeechSynthesizer for RecordingSynthesizer {
        fn speak(&mut self, utterance: &Utterance) -> ClientResult<()> {
            let mut audible = self.audible.lock().unwrap();
            assert!(audible.is_none(), "two utterances audible at once");
            *audible = Some(utterance.text.clone());
            self.calls.lock().unwrap().push(SpeechCall::Speak(
                utterance.text.clone(),
                utterance.voice.as_ref().map(|v| v.name.clone()),
            ));
            Ok(())
        }

        fn cancel(&mut self) {
            *self.audible.lock().unwrap() = None;
            self.calls.lock().unwrap().push(SpeechCall::Cancel);
        }
    }

    impl RecordingSynthesizer {
        pub(crate) fn spoken(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    SpeechCall::Speak(text, _) => Some(text.clone()),
                    SpeechCall::Cancel => None,
                })
                .collect()
        }

        pub(crate) fn is_audible(&self) -> bool {
            self.audible.lock().unwrap().is_some()
        }

        pub(crate) fn cancels(&self) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == SpeechCall::Cancel).count()
        }
    }

    pub(crate) fn scheduler_with(synth: RecordingSynthesizer) -> SpeechScheduler {
        let config = crate::config::AppConfig::default().speech;
        let selectors = crate::speech::selectors_from_config(&config);
        SpeechScheduler::new(Box::new(synth), selectors, &config).unwrap()
    }

    fn voice(name: &str, locale: &str) -> Voice {
        Voice { id: locale.into(), name: name.into(), locale: locale.into(), is_default: false }
    }

    #[test]
    fn test_strip_emphasis() {
        let scheduler = scheduler_with(RecordingSynthesizer::default());
        assert_eq!(scheduler.strip_emphasis("**Great** job, _really_ __good__ *work*"), "Great job, really good work");
        assert_eq!(scheduler.strip_emphasis("snake_case"), "snakecase");
        assert_eq!(scheduler.strip_emphasis("plain"), "plain");
    }

    #[test]
    fn test_second_speak_replaces_first() {
        let synth = RecordingSynthesizer::default();
        let mut scheduler = scheduler_with(synth.clone());

        scheduler.speak("**A**").unwrap();
        scheduler.speak("*B*").unwrap();

        assert_eq!(synth.spoken(), vec!["A", "B"]);
        assert_eq!(synth.audible.lock().unwrap().as_deref(), Some("B"));
        assert_eq!(scheduler.current_utterance().unwrap().text, "B");
    }

    #[test]
    fn test_cancel_silences() {
        let synth = RecordingSynthesizer::default();
        let mut scheduler = scheduler_with(synth.clone());

        scheduler.speak("Hello").unwrap();
        scheduler.cancel();
        assert!(!synth.is_audible());
        assert!(scheduler.current_utterance().is_none());
    }

    #[test]
    fn test_markup_only_text_just_cancels() {
        let synth = RecordingSynthesizer::default();
        let mut scheduler = scheduler_with(synth.clone());

        scheduler.speak("Hello").unwrap();
        scheduler.speak("**__**").unwrap();
        assert_eq!(synth.spoken(), vec!["Hello"]);
        assert!(!synth.is_audible());
    }

    #[test]
    fn test_voices_ready_once_without_replay() {
        let synth = RecordingSynthesizer::default();
        let mut scheduler = scheduler_with(synth.clone());

        // Before voices load the synthesizer default is used
        scheduler.speak("early").unwrap();
        assert_eq!(synth.calls.lock().unwrap()[1], SpeechCall::Speak("early".into(), None));

        scheduler.on_voices_ready(&[voice("Alex", "en-US"), voice("Samantha", "en-US")]);
        assert_eq!(synth.spoken(), vec!["early"], "readiness must not replay speech");
        assert_eq!(scheduler.selected_voice().unwrap().name, "Samantha");

        // Later readiness events are ignored
        scheduler.on_voices_ready(&[voice("Google US English", "en-US")]);
        assert_eq!(scheduler.selected_voice().unwrap().name, "Samantha");

        scheduler.speak("later").unwrap();
        assert_eq!(
            synth.calls.lock().unwrap().last().cloned(),
            Some(SpeechCall::Speak("later".into(), Some("Samantha".into())))
        );
    }
}
