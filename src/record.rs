use chrono::Local;
use clap::ValueEnum;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A classification unit as returned by GBIF. Cloned into every record and
/// cache entry that refers to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taxon {
    pub key: u64,
    pub scientific_name: String,
    pub rank: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Accepted name when this taxon is a synonym
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kingdom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phylum: Option<String>,
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
}

impl Taxon {
    pub fn new(key: u64, scientific_name: &str, rank: &str) -> Self {
        Self {
            key,
            scientific_name: scientific_name.to_string(),
            rank: rank.to_string(),
            status: None,
            accepted_name: None,
            canonical_name: None,
            kingdom: None,
            phylum: None,
            class_name: None,
            order: None,
            family: None,
            genus: None,
            species: None,
        }
    }

    /// Hierarchy from kingdom down to species, skipping unknown ranks
    pub fn classification(&self) -> Vec<&str> {
        [
            &self.kingdom,
            &self.phylum,
            &self.class_name,
            &self.order,
            &self.family,
            &self.genus,
            &self.species,
        ]
        .into_iter()
        .filter_map(|rank| rank.as_deref())
        .collect()
    }
}

impl fmt::Display for Taxon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.scientific_name, self.rank)?;
        if let Some(status) = &self.status {
            write!(f, " [{}]", status)?;
        }
        if let Some(accepted) = &self.accepted_name {
            write!(f, " -> {}", accepted)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// The browser form stores an unselected confidence as `""`.
fn empty_confidence_as_none<'de, D>(deserializer: D) -> Result<Option<Confidence>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some("high") => Ok(Some(Confidence::High)),
        Some("medium") => Ok(Some(Confidence::Medium)),
        Some("low") => Ok(Some(Confidence::Low)),
        Some(other) => Err(D::Error::unknown_variant(other, &["high", "medium", "low"])),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Select => "select",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldDefinition {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Only present for select fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// A field definition before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomField {
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub options: Vec<String>,
}

impl NewCustomField {
    pub(crate) fn into_definition(self, id: String) -> CustomFieldDefinition {
        let options = match self.field_type {
            FieldType::Select => Some(self.options),
            _ => None,
        };
        CustomFieldDefinition {
            id,
            label: self.label,
            field_type: self.field_type,
            required: self.required,
            options,
        }
    }
}

/// Built-in schema used when nothing has been stored yet.
pub fn default_custom_fields() -> Vec<CustomFieldDefinition> {
    let select = |id: &str, label: &str, options: &[&str]| CustomFieldDefinition {
        id: id.to_string(),
        label: label.to_string(),
        field_type: FieldType::Select,
        required: false,
        options: Some(options.iter().map(|o| o.to_string()).collect()),
    };

    vec![
        CustomFieldDefinition {
            id: "field-1".to_string(),
            label: "Sample Code".to_string(),
            field_type: FieldType::Text,
            required: true,
            options: None,
        },
        select(
            "field-2",
            "Collection Method",
            &["Net", "Trap", "Hand Collection", "Light Trap", "Other"],
        ),
        select(
            "field-3",
            "Preservation Method",
            &["Pinned", "Alcohol", "Slide Mount", "Other"],
        ),
    ]
}

/// Everything an identification carries apart from its id and taxon.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationDetails {
    pub identification_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub habitat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_code: Option<String>,
    /// Name of the person who made the identification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(
        default,
        deserialize_with = "empty_confidence_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Values keyed by custom field id. Keys of removed fields are kept.
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationRecord {
    pub id: String,
    pub taxon: Taxon,
    #[serde(flatten)]
    pub details: IdentificationDetails,
}

/// A record that has passed validation but has not been given an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentification {
    pub taxon: Taxon,
    pub details: IdentificationDetails,
}

impl NewIdentification {
    pub(crate) fn into_record(self, id: String) -> IdentificationRecord {
        IdentificationRecord {
            id,
            taxon: self.taxon,
            details: self.details,
        }
    }
}

/// The single in-progress identification. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub id: String,
    pub taxon: Option<Taxon>,
    pub details: IdentificationDetails,
}

impl Draft {
    pub fn new(id: String) -> Self {
        Self {
            id,
            taxon: None,
            details: IdentificationDetails {
                identification_date: today(),
                ..IdentificationDetails::default()
            },
        }
    }
}

/// Shallow patch applied to the draft. `None` leaves a field alone; an empty
/// string clears an optional text field. Custom-field values are set one at a
/// time through the state so they can be checked against the schema.
#[derive(Debug, Clone, Default)]
pub struct DraftUpdate {
    pub taxon: Option<Taxon>,
    pub identification_date: Option<String>,
    pub observation_date: Option<String>,
    pub location: Option<String>,
    pub habitat: Option<String>,
    pub collector: Option<String>,
    pub identifier: Option<String>,
    pub confidence: Option<Confidence>,
    pub method: Option<String>,
    pub notes: Option<String>,
}

impl DraftUpdate {
    pub(crate) fn apply(self, draft: &mut Draft) {
        fn merge(target: &mut Option<String>, value: Option<String>) {
            if let Some(value) = value {
                *target = if value.is_empty() { None } else { Some(value) };
            }
        }

        if let Some(taxon) = self.taxon {
            draft.taxon = Some(taxon);
        }
        let details = &mut draft.details;
        if let Some(date) = self.identification_date {
            details.identification_date = date;
        }
        merge(&mut details.observation_date, self.observation_date);
        merge(&mut details.location, self.location);
        merge(&mut details.habitat, self.habitat);
        merge(&mut details.collector, self.collector);
        merge(&mut details.identifier, self.identifier);
        merge(&mut details.method, self.method);
        merge(&mut details.notes, self.notes);
        if let Some(confidence) = self.confidence {
            details.confidence = Some(confidence);
        }
    }
}

/// Today's local date as `YYYY-MM-DD`
pub fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> IdentificationRecord {
        let mut taxon = Taxon::new(1920506, "Apis mellifera Linnaeus, 1758", "SPECIES");
        taxon.order = Some("Hymenoptera".to_string());
        taxon.family = Some("Apidae".to_string());
        let mut details = IdentificationDetails {
            identification_date: "2024-05-01".to_string(),
            location: Some("Kew".to_string()),
            confidence: Some(Confidence::Medium),
            ..IdentificationDetails::default()
        };
        details
            .custom_fields
            .insert("field-1".to_string(), "A1".to_string());
        IdentificationRecord {
            id: "rec-1".to_string(),
            taxon,
            details,
        }
    }

    #[test]
    fn test_record_uses_stored_layout() {
        let json = serde_json::to_value(sample_record()).unwrap();

        assert_eq!(json["id"], "rec-1");
        assert_eq!(json["identificationDate"], "2024-05-01");
        assert_eq!(json["confidence"], "medium");
        assert_eq!(json["taxon"]["scientificName"], "Apis mellifera Linnaeus, 1758");
        assert_eq!(json["taxon"]["order"], "Hymenoptera");
        assert_eq!(json["customFields"]["field-1"], "A1");
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn test_reads_record_written_by_browser_app() {
        let raw = r#"{
            "id": "7c9e",
            "taxon": {"key": 5, "scientificName": "Bombus", "rank": "GENUS", "class": "Insecta"},
            "identificationDate": "2023-07-14",
            "sampleCode": "legacy",
            "customFields": {"field-1": "B2", "gone": "kept"}
        }"#;
        let record: IdentificationRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(record.taxon.class_name.as_deref(), Some("Insecta"));
        assert_eq!(record.details.custom_fields.len(), 2);
        assert_eq!(record.details.custom_fields["gone"], "kept");

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["sampleCode"], "legacy");
    }

    #[test]
    fn test_unselected_confidence_reads_as_none() {
        let raw = r#"[
            {"id": "old-1", "taxon": {"key": 5, "scientificName": "Bombus", "rank": "GENUS"},
             "identificationDate": "2023-07-14", "confidence": "", "location": "",
             "customFields": {}},
            {"id": "old-2", "taxon": {"key": 6, "scientificName": "Apis", "rank": "GENUS"},
             "identificationDate": "2023-07-15", "confidence": "low", "customFields": {}}
        ]"#;
        let records: Vec<IdentificationRecord> = serde_json::from_str(raw).unwrap();

        assert_eq!(records[0].details.confidence, None);
        assert_eq!(records[1].details.confidence, Some(Confidence::Low));
        let written = serde_json::to_value(&records[0]).unwrap();
        assert!(written.get("confidence").is_none());

        let bad = raw.replace("\"low\"", "\"certain\"");
        assert!(serde_json::from_str::<Vec<IdentificationRecord>>(&bad).is_err());
    }

    #[test]
    fn test_new_field_drops_options_unless_select() {
        let field = NewCustomField {
            label: "Count".to_string(),
            field_type: FieldType::Number,
            required: false,
            options: vec!["stray".to_string()],
        };
        assert_eq!(field.into_definition("x".to_string()).options, None);

        let field = NewCustomField {
            label: "Sex".to_string(),
            field_type: FieldType::Select,
            required: true,
            options: vec!["M".to_string(), "F".to_string()],
        };
        let definition = field.into_definition("y".to_string());
        assert_eq!(definition.options, Some(vec!["M".to_string(), "F".to_string()]));
    }

    #[test]
    fn test_default_fields() {
        let fields = default_custom_fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].label, "Sample Code");
        assert!(fields[0].required);
        assert_eq!(fields[1].options.as_ref().map(Vec::len), Some(5));
    }

    #[test]
    fn test_draft_update_is_shallow() {
        let mut draft = Draft::new("d".to_string());
        draft.details.location = Some("Kew".to_string());
        draft
            .details
            .custom_fields
            .insert("field-1".to_string(), "A1".to_string());

        DraftUpdate {
            notes: Some("worn wings".to_string()),
            ..DraftUpdate::default()
        }
        .apply(&mut draft);
        assert_eq!(draft.details.location.as_deref(), Some("Kew"));
        assert_eq!(draft.details.notes.as_deref(), Some("worn wings"));

        DraftUpdate {
            location: Some(String::new()),
            ..DraftUpdate::default()
        }
        .apply(&mut draft);
        assert_eq!(draft.details.location, None);
        assert_eq!(draft.details.custom_fields["field-1"], "A1");
    }

    #[test]
    fn test_classification_skips_missing_ranks() {
        let record = sample_record();
        assert_eq!(record.taxon.classification(), vec!["Hymenoptera", "Apidae"]);
    }
}
