use crate::audio::TranscriptionModel;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscription {
    /// The model to use for transcription: "whisper-1"
    model: TranscriptionModel,
}

impl Default for InputAudioTranscription {
    fn default() -> Self {
        Self {
            model: TranscriptionModel::Whisper,
        }
    }
}

impl InputAudioTranscription {
    pub fn new(model: TranscriptionModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &TranscriptionModel {
        &self.model
    }
}
