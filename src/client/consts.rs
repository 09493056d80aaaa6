pub const BASE_URL: &str = "wss://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const OPENAI_BETA_HEADER: &str = "OpenAI-Beta";

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
