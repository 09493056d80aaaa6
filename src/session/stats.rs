/// Running totals for one connection.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    audio_blocks: u64,
    audio_samples: u64,
    responses: u64,
    total_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_audio(&mut self, samples: usize) {
        self.audio_blocks += 1;
        self.audio_samples += samples as u64;
    }

    pub(crate) fn record_response(&mut self, total: u32, input: u32, output: u32) {
        self.responses += 1;
        self.total_tokens += u64::from(total);
        self.input_tokens += u64::from(input);
        self.output_tokens += u64::from(output);
    }

    pub fn audio_blocks(&self) -> u64 {
        self.audio_blocks
    }

    pub fn audio_samples(&self) -> u64 {
        self.audio_samples
    }

    pub fn responses(&self) -> u64 {
        self.responses
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }
}
