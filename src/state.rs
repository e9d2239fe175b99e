//! Owner of saved identifications, the custom-field schema, the recent-taxa
//! cache and the single draft.
//!
//! Every mutation of a durable collection rewrites that whole collection to
//! the store. If the write fails the in-memory collection is restored, so
//! memory and storage never disagree.

use crate::error::{Error, Result};
use crate::record::{
    CustomFieldDefinition, Draft, DraftUpdate, IdentificationRecord, NewCustomField,
    NewIdentification, Taxon, default_custom_fields,
};
use crate::store::KeyValueStore;
use crate::validate::{normalize_field_value, validate_draft};
use log::{info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub const IDENTIFICATIONS_KEY: &str = "identifications";
pub const CUSTOM_FIELDS_KEY: &str = "customFields";
pub const RECENT_TAXA_KEY: &str = "recentTaxa";

pub const MAX_RECENT_TAXA: usize = 10;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct IdentificationState<S: KeyValueStore> {
    store: S,
    identifications: Vec<IdentificationRecord>,
    custom_fields: Vec<CustomFieldDefinition>,
    recent_taxa: Vec<Taxon>,
    draft: Draft,
}

impl<S: KeyValueStore> IdentificationState<S> {
    /// Read all three collections from `store`. Each one falls back to its
    /// default independently when missing or unparsable.
    pub fn load_all(store: S) -> Self {
        let identifications = load_or(&store, IDENTIFICATIONS_KEY, Vec::new);
        let custom_fields = load_or(&store, CUSTOM_FIELDS_KEY, default_custom_fields);
        let recent_taxa = load_or(&store, RECENT_TAXA_KEY, Vec::new);

        info!(
            "Loaded {} identifications, {} custom fields, {} recent taxa",
            identifications.len(),
            custom_fields.len(),
            recent_taxa.len()
        );

        Self {
            store,
            identifications,
            custom_fields,
            recent_taxa,
            draft: Draft::new(new_id()),
        }
    }

    /// Saved records, most recent first
    pub fn identifications(&self) -> &[IdentificationRecord] {
        &self.identifications
    }

    pub fn custom_fields(&self) -> &[CustomFieldDefinition] {
        &self.custom_fields
    }

    pub fn recent_taxa(&self) -> &[Taxon] {
        &self.recent_taxa
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Look a field up by id, or by case-insensitive label.
    pub fn find_custom_field(&self, id_or_label: &str) -> Option<&CustomFieldDefinition> {
        self.custom_fields
            .iter()
            .find(|field| field.id == id_or_label)
            .or_else(|| {
                self.custom_fields
                    .iter()
                    .find(|field| field.label.eq_ignore_ascii_case(id_or_label))
            })
    }

    /// Store a new record at the front of the collection. Performs no
    /// validation.
    pub fn add_identification(
        &mut self,
        identification: NewIdentification,
    ) -> Result<IdentificationRecord> {
        let mut id = new_id();
        while self.identifications.iter().any(|r| r.id == id) {
            id = new_id();
        }
        let record = identification.into_record(id);

        self.identifications.insert(0, record.clone());
        if let Err(e) = persist(&mut self.store, IDENTIFICATIONS_KEY, &self.identifications) {
            self.identifications.remove(0);
            return Err(e);
        }

        info!(
            "Saved identification {} ({})",
            record.id, record.taxon.scientific_name
        );
        Ok(record)
    }

    pub fn update_draft(&mut self, update: DraftUpdate) {
        update.apply(&mut self.draft);
    }

    pub fn reset_draft(&mut self) {
        self.draft = Draft::new(new_id());
    }

    /// Put `taxon` on the draft and refresh it in the recent-taxa cache.
    pub fn select_taxon(&mut self, taxon: Taxon) -> Result<()> {
        self.draft.taxon = Some(taxon.clone());
        self.add_to_recent_taxa(taxon)
    }

    /// Set one custom-field value on the draft. Only ids currently in the
    /// schema are accepted.
    pub fn set_draft_field_value(&mut self, field_id: &str, value: &str) -> Result<()> {
        let field = self
            .custom_fields
            .iter()
            .find(|field| field.id == field_id)
            .ok_or_else(|| Error::UnknownField(field_id.to_string()))?;
        let value = normalize_field_value(field, value)?;

        let values = &mut self.draft.details.custom_fields;
        if value.is_empty() {
            values.remove(field_id);
        } else {
            values.insert(field_id.to_string(), value);
        }
        Ok(())
    }

    /// Validate the draft, save it and start a fresh one. On any error the
    /// draft is left as it was.
    pub fn submit_draft(&mut self) -> Result<IdentificationRecord> {
        let identification = validate_draft(&self.draft, &self.custom_fields)?;
        let record = self.add_identification(identification)?;
        self.reset_draft();
        Ok(record)
    }

    pub fn add_custom_field(&mut self, field: NewCustomField) -> Result<CustomFieldDefinition> {
        let mut id = new_id();
        while self.custom_fields.iter().any(|f| f.id == id) {
            id = new_id();
        }
        let definition = field.into_definition(id);

        self.custom_fields.push(definition.clone());
        if let Err(e) = persist(&mut self.store, CUSTOM_FIELDS_KEY, &self.custom_fields) {
            self.custom_fields.pop();
            return Err(e);
        }

        info!("Added custom field {} ({})", definition.label, definition.id);
        Ok(definition)
    }

    /// Drop a field from the schema. Values already stored under its id stay
    /// on their records.
    pub fn remove_custom_field(&mut self, id: &str) -> Result<Option<CustomFieldDefinition>> {
        let Some(position) = self.custom_fields.iter().position(|f| f.id == id) else {
            persist(&mut self.store, CUSTOM_FIELDS_KEY, &self.custom_fields)?;
            return Ok(None);
        };

        let removed = self.custom_fields.remove(position);
        if let Err(e) = persist(&mut self.store, CUSTOM_FIELDS_KEY, &self.custom_fields) {
            self.custom_fields.insert(position, removed);
            return Err(e);
        }

        info!("Removed custom field {} ({})", removed.label, removed.id);
        Ok(Some(removed))
    }

    pub fn add_to_recent_taxa(&mut self, taxon: Taxon) -> Result<()> {
        let key = taxon.key;
        let mut updated = Vec::with_capacity(MAX_RECENT_TAXA + 1);
        updated.push(taxon);
        updated.extend(self.recent_taxa.iter().filter(|t| t.key != key).cloned());
        updated.truncate(MAX_RECENT_TAXA);

        persist(&mut self.store, RECENT_TAXA_KEY, &updated)?;
        self.recent_taxa = updated;
        Ok(())
    }

    /// Forget everything stored and return to the defaults.
    pub fn purge(&mut self) -> Result<()> {
        for key in [IDENTIFICATIONS_KEY, CUSTOM_FIELDS_KEY, RECENT_TAXA_KEY] {
            self.store.clear(key)?;
        }
        self.identifications.clear();
        self.custom_fields = default_custom_fields();
        self.recent_taxa.clear();
        self.reset_draft();
        warn!("Purged all stored identifications, fields and recent taxa");
        Ok(())
    }
}

fn load_or<T, F>(store: &impl KeyValueStore, key: &str, default: F) -> Vec<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> Vec<T>,
{
    let Some(raw) = store.get(key) else {
        return default();
    };
    match serde_json::from_str(&raw) {
        Ok(values) => values,
        Err(e) => {
            warn!("Ignoring unreadable {} data: {}", key, e);
            default()
        }
    }
}

fn persist<T: Serialize>(store: &mut impl KeyValueStore, key: &str, values: &[T]) -> Result<()> {
    let json = serde_json::to_string(values)?;
    store.set(key, &json)
}
