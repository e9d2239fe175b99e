use crate::error::Result;
use crate::record::{CustomFieldDefinition, IdentificationRecord};
use chrono::NaiveDate;
use csv::{QuoteStyle, WriterBuilder};
use log::info;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const BASE_HEADERS: [&str; 8] = [
    "Scientific Name",
    "Identification Date",
    "Observation Date",
    "Location",
    "Identifier",
    "Method",
    "Confidence",
    "Notes",
];

pub fn default_export_filename(date: NaiveDate) -> String {
    format!("insect-identifications-{}.csv", date.format("%Y-%m-%d"))
}

/// Write one header row and one row per record. Custom columns follow the
/// current schema; values stored under removed fields are not exported.
pub fn write_csv<W: Write>(
    writer: W,
    records: &[IdentificationRecord],
    fields: &[CustomFieldDefinition],
) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(writer);

    let headers = BASE_HEADERS
        .iter()
        .copied()
        .chain(fields.iter().map(|field| field.label.as_str()));
    writer.write_record(headers)?;

    for record in records {
        let details = &record.details;
        let optional = |value: &Option<String>| value.clone().unwrap_or_default();

        let mut row = vec![
            record.taxon.scientific_name.clone(),
            details.identification_date.clone(),
            optional(&details.observation_date),
            optional(&details.location),
            optional(&details.identifier),
            optional(&details.method),
            details
                .confidence
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
            optional(&details.notes),
        ];
        row.extend(fields.iter().map(|field| {
            details
                .custom_fields
                .get(&field.id)
                .cloned()
                .unwrap_or_default()
        }));
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn save_to_csv(
    records: &[IdentificationRecord],
    fields: &[CustomFieldDefinition],
    path: &Path,
) -> Result<()> {
    let file = File::create(path)?;
    write_csv(file, records, fields)?;
    info!("Exported {} identifications to {}", records.len(), path.display());
    Ok(())
}
