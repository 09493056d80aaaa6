use crate::Item;
use crate::session::Session;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionResource {
    id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(flatten)]
    session: Session,
}

impl SessionResource {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseResource {
    id: String,
    /// "in_progress", "completed", "cancelled", "failed" or "incomplete"
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<Item>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl ResponseResource {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn output(&self) -> &[Item] {
        &self.output
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    total_tokens: u32,
    input_tokens: u32,
    output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }

    pub fn input_tokens(&self) -> u32 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u32 {
        self.output_tokens
    }
}
