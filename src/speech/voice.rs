//! Voice discovery results and the ordered selection rules applied to them.

use crate::config::SpeechConfig;

/// One voice the synthesizer can use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// What the synthesizer is told to use (`-v <id>` for espeak-ng)
    pub id: String,
    /// Human-readable name, matched by `VoiceSelector::ExactName`
    pub name: String,
    /// Language tag such as `en-us`
    pub locale: String,
    /// Whether the platform marks this voice as its default
    pub is_default: bool,
}

/// One selection rule. Rules are tried in order; the first that matches wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceSelector {
    /// Voice name equals this string exactly
    ExactName(String),
    /// Voice language equals this tag (case-insensitive, `_` and `-` treated alike)
    Locale(String),
    /// Whatever the platform marks as default
    Default,
}

impl VoiceSelector {
    pub fn matches(&self, voice: &Voice) -> bool {
        match self {
            VoiceSelector::ExactName(name) => voice.name == *name,
            VoiceSelector::Locale(locale) => normalize_locale(&voice.locale) == normalize_locale(locale),
            VoiceSelector::Default => voice.is_default,
        }
    }
}

fn normalize_locale(tag: &str) -> String {
    tag.trim().replace('_', "-").to_ascii_lowercase()
}

/// Preferred names first, then the configured locale, then the platform default.
pub fn selectors_from_config(config: &SpeechConfig) -> Vec<VoiceSelector> {
    let mut selectors: Vec<VoiceSelector> = config
        .preferred_voices
        .iter()
        .map(|name| VoiceSelector::ExactName(name.clone()))
        .collect();
    selectors.push(VoiceSelector::Locale(config.locale.clone()));
    selectors.push(VoiceSelector::Default);
    selectors
}

/// Apply `selectors` in order. `None` means "let the synthesizer use its own default".
pub fn select_voice<'a>(selectors: &[VoiceSelector], voices: &'a [Voice]) -> Option<&'a Voice> {
    selectors
        .iter()
        .find_map(|selector| voices.iter().find(|voice| selector.matches(voice)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(name: &str, locale: &str) -> Voice {
        Voice { id: locale.to_string(), name: name.to_string(), locale: locale.to_string(), is_default: false }
    }

    #[test]
    fn test_exact_name_wins_over_locale() {
        let voices = vec![voice("Daniel", "en-GB"), voice("Alex", "en-US"), voice("Samantha", "en-US")];
        let selectors = vec![
            VoiceSelector::ExactName("Google US English".into()),
            VoiceSelector::ExactName("Samantha".into()),
            VoiceSelector::Locale("en-US".into()),
        ];
        assert_eq!(select_voice(&selectors, &voices).unwrap().name, "Samantha");
    }

    #[test]
    fn test_locale_fallback_ignores_case_and_separator() {
        let voices = vec![voice("English_(Great_Britain)", "en"), voice("English_(America)", "en_us")];
        let selectors = vec![VoiceSelector::ExactName("Samantha".into()), VoiceSelector::Locale("en-US".into())];
        assert_eq!(select_voice(&selectors, &voices).unwrap().name, "English_(America)");
    }

    #[test]
    fn test_default_then_nothing() {
        let mut voices = vec![voice("Anna", "de-DE"), voice("Thomas", "fr-FR")];
        let selectors = vec![VoiceSelector::Locale("en-US".into()), VoiceSelector::Default];
        assert!(select_voice(&selectors, &voices).is_none());

        voices[1].is_default = true;
        assert_eq!(select_voice(&selectors, &voices).unwrap().name, "Thomas");
    }

    #[test]
    fn test_selectors_follow_config_order() {
        let config = crate::config::AppConfig::default().speech;
        let selectors = selectors_from_config(&config);
        assert_eq!(
            selectors,
            vec![
                VoiceSelector::ExactName("Google US English".into()),
                VoiceSelector::ExactName("Samantha".into()),
                VoiceSelector::Locale("en-US".into()),
                VoiceSelector::Default,
            ]
        );
    }
}
