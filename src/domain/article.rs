use serde::{Deserialize, Serialize};

/// One scholarly article record as parsed from a search-result page.
///
/// Immutable after creation and transient: it lives for the duration of one
/// ingestion call unless its abstract is written into the vector store.
/// Bibliographic fields degrade to empty/absent rather than failing the whole
/// record when the provider's markup is off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    /// May be empty; articles without an abstract are fetched but never stored.
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: Option<String>,
    pub authors: String,
    /// Four-digit publication year, when the result metadata carries one.
    pub year: Option<String>,
    pub publication: String,
}

impl Article {
    pub fn has_abstract(&self) -> bool {
        !self.abstract_text.trim().is_empty()
    }
}
