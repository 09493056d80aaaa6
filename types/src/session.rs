use serde::{Deserialize, Deserializer};

use crate::audio::{AudioFormat, InputAudioTranscription, TranscriptionModel, TurnDetection, Voice};

/// Session settings sent with `session.update`.
///
/// Every field is optional: an unset field is left out of the payload and the
/// service keeps its current value, so a `Session` doubles as a partial update.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    /// The set of modalities the model can respond with. To disable audio, set this to ["text"].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modalities: Option<Vec<String>>,

    /// The default system instructions prepended to model calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,

    /// The voice the model uses to respond. Cannot be changed once the model has responded with audio at least once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    voice: Option<Voice>,

    /// The format of input audio. Options are "pcm16", "g711_ulaw", "g711_alaw".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_audio_format: Option<AudioFormat>,

    /// The format of output audio. Options are "pcm16", "g711_ulaw", "g711_alaw".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_audio_format: Option<AudioFormat>,

    /// Configuration for input audio transcription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<InputAudioTranscription>,

    /// Configuration for turn detection. `Some(TurnDetection::Manual)` is sent as null.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    turn_detection: Option<TurnDetection>,

    /// Sampling temperature for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    /// Maximum number of output tokens. "inf" or number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_response_output_tokens: Option<MaxOutputTokens>,
}

// Keeps an explicit `null` as `Some(..)` instead of collapsing it into "unset".
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl Session {
    pub fn new() -> SessionConfigurator {
        SessionConfigurator::new()
    }

    /// Overwrites every field that is set in `update`, leaving the others untouched.
    pub fn merge(&mut self, update: Session) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.modalities, update.modalities);
        take(&mut self.instructions, update.instructions);
        take(&mut self.voice, update.voice);
        take(&mut self.input_audio_format, update.input_audio_format);
        take(&mut self.output_audio_format, update.output_audio_format);
        take(&mut self.input_audio_transcription, update.input_audio_transcription);
        take(&mut self.turn_detection, update.turn_detection);
        take(&mut self.temperature, update.temperature);
        take(&mut self.max_response_output_tokens, update.max_response_output_tokens);
    }

    pub fn is_empty(&self) -> bool {
        *self == Session::default()
    }

    pub fn modalities(&self) -> Option<&[String]> {
        self.modalities.as_deref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn input_audio_format(&self) -> Option<AudioFormat> {
        self.input_audio_format
    }

    pub fn output_audio_format(&self) -> Option<AudioFormat> {
        self.output_audio_format
    }

    pub fn input_audio_transcription(&self) -> Option<&InputAudioTranscription> {
        self.input_audio_transcription.as_ref()
    }

    pub fn turn_detection(&self) -> Option<&TurnDetection> {
        self.turn_detection.as_ref()
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn max_response_output_tokens(&self) -> Option<&MaxOutputTokens> {
        self.max_response_output_tokens.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MaxOutputTokens {
    Number(i32),
    Infinity(String),
}

pub struct SessionConfigurator {
    session: Session,
}

impl Default for SessionConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfigurator {
    pub fn new() -> Self {
        Self {
            session: Session::default(),
        }
    }

    pub fn with_modalities(mut self, modalities: Vec<String>) -> Self {
        self.session.modalities = Some(modalities);
        self
    }

    pub fn with_modalities_disable_audio(mut self) -> Self {
        self.session.modalities = Some(vec!["text".to_string()]);
        self
    }

    pub fn with_modalities_enable_audio(mut self) -> Self {
        self.session.modalities = Some(vec!["text".to_string(), "audio".to_string()]);
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.session.instructions = Some(instructions.to_string());
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.session.voice = Some(voice);
        self
    }

    pub fn with_input_audio_format(mut self, format: AudioFormat) -> Self {
        self.session.input_audio_format = Some(format);
        self
    }

    pub fn with_output_audio_format(mut self, format: AudioFormat) -> Self {
        self.session.output_audio_format = Some(format);
        self
    }

    pub fn with_input_audio_transcription_enable(mut self, model: TranscriptionModel) -> Self {
        self.session.input_audio_transcription = Some(InputAudioTranscription::new(model));
        self
    }

    pub fn with_turn_detection(mut self, turn_detection: TurnDetection) -> Self {
        self.session.turn_detection = Some(turn_detection);
        self
    }

    pub fn with_turn_detection_disable(mut self) -> Self {
        self.session.turn_detection = Some(TurnDetection::Manual);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.session.temperature = Some(temperature);
        self
    }

    pub fn with_max_response_output_tokens(mut self, max_output_tokens: MaxOutputTokens) -> Self {
        self.session.max_response_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_updates_supersede_earlier_fields() {
        let mut session = Session::new()
            .with_instructions("You are a great, upbeat friend.")
            .build();
        session.merge(Session::new().with_voice(Voice::Alloy).build());
        session.merge(
            Session::new()
                .with_turn_detection(TurnDetection::server_vad())
                .with_input_audio_transcription_enable(TranscriptionModel::Whisper)
                .build(),
        );
        session.merge(Session::new().with_voice(Voice::Echo).build());

        assert_eq!(session.instructions(), Some("You are a great, upbeat friend."));
        assert_eq!(session.voice(), Some(&Voice::Echo));
        assert_eq!(session.turn_detection(), Some(&TurnDetection::server_vad()));
        assert_eq!(
            session.input_audio_transcription().map(|t| t.model()),
            Some(&TranscriptionModel::Whisper)
        );
        assert_eq!(session.temperature(), None);
    }

    #[test]
    fn unset_fields_are_left_out_of_the_payload() {
        let session = Session::new()
            .with_voice(Voice::Alloy)
            .with_turn_detection_disable()
            .build();
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json, serde_json::json!({ "voice": "alloy", "turn_detection": null }));
    }

    #[test]
    fn explicit_null_turn_detection_is_manual() {
        let session: Session = serde_json::from_str(r#"{"turn_detection":null,"voice":"alloy"}"#).unwrap();
        assert_eq!(session.turn_detection(), Some(&TurnDetection::Manual));

        let session: Session = serde_json::from_str(r#"{"voice":"alloy","max_response_output_tokens":"inf"}"#).unwrap();
        assert_eq!(session.turn_detection(), None);
        assert_eq!(
            session.max_response_output_tokens(),
            Some(&MaxOutputTokens::Infinity("inf".to_string()))
        );
    }
}
