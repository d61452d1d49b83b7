//! Farewell detection
//!
//! Watches the model's text output for a goodbye so the conversation can be
//! closed on its own shortly after the model finishes saying it.

/// Phrases that end a conversation
pub const DEFAULT_FAREWELL_PHRASES: &[&str] = &[
    "adiós",
    "adios",
    "hasta luego",
    "hasta pronto",
    "hasta la próxima",
    "que tenga buen día",
    "que tenga un buen día",
    "nos vemos",
    "chau",
    "goodbye",
];

/// One-shot matcher over model text
///
/// Fires on the first text containing any phrase, then stays quiet until
/// [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct FarewellDetector {
    phrases: Vec<String>,
    fired: bool,
}

impl FarewellDetector {
    /// Create a detector for the given phrases (matched case-insensitively)
    #[must_use]
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        tracing::debug!(phrases = ?phrases, "farewell detector initialized");

        Self {
            phrases,
            fired: false,
        }
    }

    /// Check a piece of model text
    ///
    /// Returns `true` only for the first match since the last reset.
    pub fn check(&mut self, text: &str) -> bool {
        if self.fired {
            return false;
        }

        let normalized = text.to_lowercase();
        let Some(phrase) = self.phrases.iter().find(|p| normalized.contains(p.as_str())) else {
            return false;
        };

        tracing::debug!(phrase = %phrase, "farewell detected");
        self.fired = true;
        true
    }

    /// Re-arm for a new connection
    pub fn reset(&mut self) {
        self.fired = false;
    }

    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fired
    }

    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

impl Default for FarewellDetector {
    fn default() -> Self {
        Self::new(DEFAULT_FAREWELL_PHRASES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_match() {
        let mut detector = FarewellDetector::default();
        assert!(detector.check("Perfecto, ADIÓS y gracias"));
    }

    #[test]
    fn test_two_phrases_fire_once() {
        let mut detector = FarewellDetector::default();
        assert!(detector.check("Hasta luego, que tenga buen día"));
        assert!(!detector.check("Hasta luego"));
        assert!(detector.has_fired());
    }

    #[test]
    fn test_reset_rearms() {
        let mut detector = FarewellDetector::default();
        assert!(detector.check("nos vemos"));
        detector.reset();
        assert!(detector.check("nos vemos"));
    }

    #[test]
    fn test_no_match() {
        let mut detector = FarewellDetector::default();
        assert!(!detector.check("La auditoría inicial comienza desde 1.500 USD"));
        assert!(!detector.has_fired());
    }

    #[test]
    fn test_custom_phrases_skip_blank() {
        let detector = FarewellDetector::new(["  Bye ", ""]);
        assert_eq!(detector.phrases(), ["bye"]);
    }
}
