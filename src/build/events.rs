use serde::Serialize;

/// One unit of the build-status stream.
///
/// Every build produces any number of `Out`/`Err` lines followed by exactly
/// one `Complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildEvent {
    Out {
        text: String,
    },
    Err {
        text: String,
    },
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl BuildEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, BuildEvent::Complete { .. })
    }
}
