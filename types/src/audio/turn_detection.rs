use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How the service decides where a user turn ends.
///
/// `Manual` serializes as `null`: the client commits the input buffer itself.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnDetection {
    Manual,
    ServerVad(ServerVadTurnDetection),
}

impl TurnDetection {
    pub fn server_vad() -> Self {
        Self::ServerVad(ServerVadTurnDetection::default())
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, TurnDetection::Manual)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum TaggedTurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad(ServerVadTurnDetection),
}

impl Serialize for TurnDetection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TurnDetection::Manual => serializer.serialize_none(),
            TurnDetection::ServerVad(vad) => {
                TaggedTurnDetection::ServerVad(vad.clone()).serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for TurnDetection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<TaggedTurnDetection>::deserialize(deserializer)? {
            None => TurnDetection::Manual,
            Some(TaggedTurnDetection::ServerVad(vad)) => TurnDetection::ServerVad(vad),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServerVadTurnDetection {
    /// Activation threshold for VAD(0.0 to 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    threshold: Option<f32>,

    /// Amount of audio to include before speech starts, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefix_padding_ms: Option<i32>,

    /// Duration of silence to detect speech stop, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    silence_duration_ms: Option<i32>,
}

impl ServerVadTurnDetection {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_prefix_padding_ms(mut self, prefix_padding_ms: i32) -> Self {
        self.prefix_padding_ms = Some(prefix_padding_ms);
        self
    }

    pub fn with_silence_duration_ms(mut self, silence_duration_ms: i32) -> Self {
        self.silence_duration_ms = Some(silence_duration_ms);
        self
    }

    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    pub fn prefix_padding_ms(&self) -> Option<i32> {
        self.prefix_padding_ms
    }

    pub fn silence_duration_ms(&self) -> Option<i32> {
        self.silence_duration_ms
    }
}
