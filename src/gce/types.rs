//! Wire types for the Compute Engine REST API.

use serde::Deserialize;

use crate::provider::Instance;

/// A paginated list response.
pub(super) trait Page {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(super) struct ZoneList {
    #[serde(default)]
    pub(super) items: Vec<ZoneEntry>,
    pub(super) next_page_token: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ZoneEntry {
    pub(super) name: String,
}

impl Page for ZoneList {
    type Item = String;

    fn into_parts(self) -> (Vec<String>, Option<String>) {
        let names = self.items.into_iter().map(|zone| zone.name).collect();
        (names, self.next_page_token)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceList {
    #[serde(default)]
    pub(super) items: Vec<Instance>,
    pub(super) next_page_token: Option<String>,
}

impl Page for InstanceList {
    type Item = Instance;

    fn into_parts(self) -> (Vec<Instance>, Option<String>) {
        (self.items, self.next_page_token)
    }
}

/// Google API error envelope: `{"error": {"code": 412, "message": "..."}}`.
#[derive(Clone, Debug, Deserialize)]
pub(super) struct ErrorEnvelope {
    pub(super) error: ErrorBody,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ErrorBody {
    pub(super) message: String,
}
