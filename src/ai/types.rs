use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed waste taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WasteCategory {
    Recyclable,
    Compostable,
    #[serde(rename = "Non-Recyclable")]
    NonRecyclable,
}

impl WasteCategory {
    pub const ALL: [WasteCategory; 3] = [
        WasteCategory::Recyclable,
        WasteCategory::Compostable,
        WasteCategory::NonRecyclable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WasteCategory::Recyclable => "Recyclable",
            WasteCategory::Compostable => "Compostable",
            WasteCategory::NonRecyclable => "Non-Recyclable",
        }
    }

    /// Map whatever the model returned onto the taxonomy.
    ///
    /// Exact matches pass through. Otherwise the lowercased string is searched
    /// for "recyclable", then "compostable"; anything else is Non-Recyclable.
    /// Note that "non-recyclable <something>" therefore lands on Recyclable.
    pub fn repair(raw: &str) -> WasteCategory {
        if let Ok(category) = raw.parse() {
            return category;
        }
        let lower = raw.to_lowercase();
        if lower.contains("recyclable") {
            WasteCategory::Recyclable
        } else if lower.contains("compostable") {
            WasteCategory::Compostable
        } else {
            WasteCategory::NonRecyclable
        }
    }
}

impl fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact, case-sensitive match on the three canonical names.
impl FromStr for WasteCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WasteCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("not a waste category: {:?}", s))
    }
}

/// The record exactly as the model returns it. Every field is required;
/// `classification` is still free text at this point.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClassification {
    pub object_name: String,
    pub classification: String,
    pub disposal_suggestion: String,
    pub eco_tip: String,
}

/// Validated outcome of one classification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub object_name: String,
    pub classification: WasteCategory,
    pub disposal_suggestion: String,
    pub eco_tip: String,
}

impl From<RawClassification> for ClassificationResult {
    fn from(raw: RawClassification) -> Self {
        let classification = WasteCategory::repair(&raw.classification);
        if classification.as_str() != raw.classification {
            log::warn!(
                "Repaired category {:?} -> {}",
                raw.classification,
                classification
            );
        }
        Self {
            object_name: raw.object_name,
            classification,
            disposal_suggestion: raw.disposal_suggestion,
            eco_tip: raw.eco_tip,
        }
    }
}

/// Error type for classification requests
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("No image selected")]
    NoInput,
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Response is missing required field `{0}`")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_values_pass_through() {
        for category in WasteCategory::ALL {
            assert_eq!(WasteCategory::repair(category.as_str()), category);
        }
    }

    #[test]
    fn repair_matches_keywords_case_insensitively() {
        assert_eq!(WasteCategory::repair("recyclable material"), WasteCategory::Recyclable);
        assert_eq!(WasteCategory::repair("Compostable waste"), WasteCategory::Compostable);
        assert_eq!(WasteCategory::repair("COMPOSTABLE"), WasteCategory::Compostable);
        assert_eq!(WasteCategory::repair("glass"), WasteCategory::NonRecyclable);
        assert_eq!(WasteCategory::repair(""), WasteCategory::NonRecyclable);
    }

    #[test]
    fn keyword_priority_prefers_recyclable() {
        assert_eq!(
            WasteCategory::repair("non-recyclable plastic"),
            WasteCategory::Recyclable
        );
        assert_eq!(
            WasteCategory::repair("compostable or recyclable"),
            WasteCategory::Recyclable
        );
    }

    #[test]
    fn repair_is_idempotent() {
        for raw in ["recyclable material", "Compostable waste", "glass", "Non-Recyclable"] {
            let once = WasteCategory::repair(raw);
            assert_eq!(WasteCategory::repair(once.as_str()), once);
        }
    }

    #[test]
    fn raw_record_is_repaired_on_conversion() {
        let raw: RawClassification = serde_json::from_str(
            r#"{"objectName":"apple core","classification":"compostable","disposalSuggestion":"Green bin.","ecoTip":"Start a compost pile."}"#,
        )
        .unwrap();
        let result = ClassificationResult::from(raw);
        assert_eq!(result.classification, WasteCategory::Compostable);
        assert_eq!(result.object_name, "apple core");
    }

    #[test]
    fn missing_field_fails_to_decode() {
        let err = serde_json::from_str::<RawClassification>(
            r#"{"objectName":"can","classification":"Recyclable","disposalSuggestion":"Rinse."}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn result_serializes_canonical_category_names() {
        let result = ClassificationResult {
            object_name: "chip bag".into(),
            classification: WasteCategory::NonRecyclable,
            disposal_suggestion: "General waste.".into(),
            eco_tip: "Buy in bulk.".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["classification"], "Non-Recyclable");
        assert_eq!(json["objectName"], "chip bag");
        assert_eq!(json["ecoTip"], "Buy in bulk.");
    }
}
