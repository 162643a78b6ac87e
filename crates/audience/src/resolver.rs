use dripline_core::FlowResult;
use serde::{Deserialize, Serialize};

/// How a flow names the people it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AudienceSelector {
    /// Current members of a saved data view.
    DataView { dataview_id: String },
    /// Current members of a group.
    Group { group_id: String },
    /// An explicit alias list.
    Static { aliases: Vec<String> },
}

/// Port for materializing a selector into person aliases.
///
/// The returned sequence is finite and restartable; resolution happens once
/// per instance, when its first communication goes out.
pub trait AudienceResolver: Send + Sync {
    fn resolve(&self, selector: &AudienceSelector) -> FlowResult<Vec<String>>;
}
