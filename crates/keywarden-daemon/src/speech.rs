//! Speech output seam
//!
//! The dispatcher and command handlers talk to speech through the
//! [`SpeechOutput`] trait so tests can record utterances instead of
//! producing audio. The production implementation logs through `tracing`;
//! wiring a real synthesizer sink happens behind the same trait.

/// How an utterance interacts with speech already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Interrupt current speech and speak immediately.
    Flush,
    /// Append after current speech.
    Queue,
}

/// Output side of the accessibility engine.
pub trait SpeechOutput: Send {
    /// Speak a message.
    fn speak(&mut self, text: &str, mode: QueueMode);

    /// Force the next utterance to flush regardless of its requested mode.
    fn flush_next(&mut self);

    /// Stop all speech immediately.
    fn stop(&mut self);
}

/// Speech output that logs utterances via `tracing`.
#[derive(Debug, Default)]
pub struct TracingSpeech {
    flush_next: bool,
}

impl TracingSpeech {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpeechOutput for TracingSpeech {
    fn speak(&mut self, text: &str, mode: QueueMode) {
        let mode = if self.flush_next {
            QueueMode::Flush
        } else {
            mode
        };
        self.flush_next = false;
        tracing::info!(?mode, "speak: {}", text);
    }

    fn flush_next(&mut self) {
        self.flush_next = true;
    }

    fn stop(&mut self) {
        self.flush_next = false;
        tracing::info!("speech stopped");
    }
}

/// Recording implementation for tests.
#[derive(Debug, Default)]
pub struct RecordingSpeech {
    pub utterances: Vec<(String, QueueMode)>,
    pub flush_next_pending: bool,
    pub stopped: usize,
}

impl RecordingSpeech {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpeechOutput for RecordingSpeech {
    fn speak(&mut self, text: &str, mode: QueueMode) {
        let mode = if self.flush_next_pending {
            QueueMode::Flush
        } else {
            mode
        };
        self.flush_next_pending = false;
        self.utterances.push((text.to_string(), mode));
    }

    fn flush_next(&mut self) {
        self.flush_next_pending = true;
    }

    fn stop(&mut self) {
        self.stopped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_next_upgrades_queued_utterance() {
        let mut speech = RecordingSpeech::new();
        speech.flush_next();
        speech.speak("hello", QueueMode::Queue);
        speech.speak("world", QueueMode::Queue);

        assert_eq!(
            speech.utterances,
            vec![
                ("hello".to_string(), QueueMode::Flush),
                ("world".to_string(), QueueMode::Queue),
            ]
        );
    }
}
