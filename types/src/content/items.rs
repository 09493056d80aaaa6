use crate::content::message::MessageItem;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Item {
    #[serde(rename = "message")]
    Message(MessageItem),
    #[serde(rename = "function_call")]
    FunctionCall(FunctionCallItem),
    #[serde(rename = "function_call_output")]
    FunctionCallOutput(FunctionCallOutputItem),
}

impl Item {
    pub fn id(&self) -> Option<&str> {
        self.header().id.as_deref()
    }

    pub fn status(&self) -> Option<ItemStatus> {
        self.header().status
    }

    fn header(&self) -> &_Item {
        match self {
            Item::Message(item) => &item.item,
            Item::FunctionCall(item) => &item.item,
            Item::FunctionCallOutput(item) => &item.item,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "incomplete")]
    Incomplete,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct _Item {
    /// The unique ID of the item, Optional for client events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The status of the item: "completed", "in_progress", "incomplete"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallItem {
    #[serde(flatten)]
    item: _Item,
    /// The ID of the function call(for "function_call" items).
    #[serde(default)]
    call_id: Option<String>,

    /// The name of the function call(for "function_call" items).
    #[serde(default)]
    name: Option<String>,

    /// The arguments of the function call(for "function_call" items).
    #[serde(default)]
    arguments: Option<String>,
}

impl FunctionCallItem {
    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn arguments(&self) -> Option<&str> {
        self.arguments.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallOutputItem {
    #[serde(flatten)]
    item: _Item,
    #[serde(default)]
    call_id: Option<String>,
    /// The output of the function call(for "function_call_output" items).
    #[serde(default)]
    output: Option<String>,
}

impl FunctionCallOutputItem {
    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }
}
