mod error;
mod export;
mod gbif;
mod parse;
mod record;
mod search;
mod session;
mod state;
mod store;
mod validate;

use crate::error::{Error, Result};
use crate::gbif::{GbifClient, species_page_url};
use crate::parse::{Args, Command, FieldsCommand, IdentifyArgs};
use crate::record::{CustomFieldDefinition, DraftUpdate, IdentificationRecord, NewCustomField};
use crate::search::SearchDebouncer;
use crate::session::Session;
use crate::state::IdentificationState;
use crate::store::{JsonFileStore, KeyValueStore};
use crate::validate::validate_new_field;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub fn describe_field(field: &CustomFieldDefinition) -> String {
    let mut line = format!("{}  {} ({})", field.id, field.label, field.field_type.as_str());
    if field.required {
        line.push_str(" required");
    }
    if let Some(options) = &field.options {
        line.push_str(&format!(" [{}]", options.join(", ")));
    }
    line
}

/// Lines of the `history --summary` report.
fn summary_lines(records: &[IdentificationRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No identifications recorded yet.".to_string()];
    }

    let mut lines = vec![
        "Summary:".to_string(),
        format!("Total identifications: {}", records.len()),
    ];

    let unique_taxa: std::collections::HashSet<u64> =
        records.iter().map(|r| r.taxon.key).collect();
    lines.push(format!("Unique taxa: {}", unique_taxa.len()));

    let dates: Vec<&String> = records
        .iter()
        .map(|r| &r.details.identification_date)
        .filter(|date| !date.is_empty())
        .collect();
    if let (Some(min_date), Some(max_date)) = (dates.iter().min(), dates.iter().max()) {
        lines.push(format!("Date range: {} to {}", min_date, max_date));
    }

    let mut location_counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        if let Some(location) = record.details.location.as_deref() {
            *location_counts.entry(location).or_insert(0) += 1;
        }
    }

    let mut sorted_locations: Vec<_> = location_counts.into_iter().collect();
    sorted_locations.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    if !sorted_locations.is_empty() {
        lines.push("Top locations:".to_string());
        for (location, count) in sorted_locations.iter().take(3) {
            lines.push(format!("  {}: {}", location, count));
        }
    }
    lines
}

pub fn print_summary(records: &[IdentificationRecord]) {
    println!();
    for line in summary_lines(records) {
        println!("{}", line);
    }
}

fn print_record(record: &IdentificationRecord, fields: &[CustomFieldDefinition]) {
    let details = &record.details;
    println!(
        "{}  {}  {}",
        details.identification_date, record.taxon.scientific_name, record.id
    );
    if !record.taxon.classification().is_empty() {
        println!("    {}", record.taxon.classification().join(" > "));
    }
    if let Some(location) = &details.location {
        println!("    Location: {}", location);
    }
    if let Some(identifier) = &details.identifier {
        println!("    Identifier: {}", identifier);
    }
    if let Some(confidence) = details.confidence {
        println!("    Confidence: {}", confidence.as_str());
    }
    for field in fields {
        if let Some(value) = details.custom_fields.get(&field.id) {
            println!("    {}: {}", field.label, value);
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn data_dir(args: &Args) -> PathBuf {
    args.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .map(|dir| dir.join("insect-id"))
            .unwrap_or_else(|| PathBuf::from("insect-id-data"))
    })
}

async fn identify<S: KeyValueStore>(
    state: &mut IdentificationState<S>,
    client: &GbifClient,
    args: IdentifyArgs,
) -> Result<IdentificationRecord> {
    let progress = spinner(format!("Fetching taxon {}", args.taxon));
    let taxon = client.taxon_details(args.taxon).await;
    progress.finish_and_clear();
    let taxon = taxon?;

    let mut values = Vec::with_capacity(args.fields.len());
    for (name, value) in &args.fields {
        let field = state
            .find_custom_field(name)
            .ok_or_else(|| Error::UnknownField(name.clone()))?;
        values.push((field.id.clone(), value.clone()));
    }

    state.select_taxon(taxon)?;
    state.update_draft(DraftUpdate {
        identification_date: args.date,
        observation_date: args.observation_date,
        location: args.location,
        habitat: args.habitat,
        collector: args.collector,
        identifier: args.identifier,
        confidence: args.confidence,
        method: args.method,
        notes: args.notes,
        ..DraftUpdate::default()
    });
    for (id, value) in values {
        state.set_draft_field_value(&id, &value)?;
    }

    state.submit_draft()
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::try_parse()?;
    // Initialize logger
    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let data_dir = data_dir(&args);
    let store = JsonFileStore::open(&data_dir)?;
    let mut state = IdentificationState::load_all(store);
    let client = GbifClient::new(Duration::from_secs(args.timeout))?
        .with_base_url(&args.gbif_url)
        .with_limit(args.limit);

    match args.command {
        Command::Search { query } => {
            let progress = spinner(format!("Searching GBIF for '{}'", query));
            let taxa = client.search_taxa(&query).await;
            progress.finish_and_clear();

            if taxa.is_empty() {
                println!("No results for '{}'", query);
            }
            for taxon in &taxa {
                println!("{:>10}  {}", taxon.key, taxon);
            }
        }
        Command::Identify(identify_args) => {
            let record = identify(&mut state, &client, identify_args).await?;
            println!(
                "Identification saved successfully: {} ({})",
                record.taxon.scientific_name, record.id
            );
            println!("{}", species_page_url(record.taxon.key));
        }
        Command::Session => {
            let search = SearchDebouncer::new(
                Arc::new(client),
                Duration::from_millis(args.debounce),
            );
            Session::new(&mut state, search).run().await?;
        }
        Command::Fields(FieldsCommand::List) => {
            for field in state.custom_fields() {
                println!("{}", describe_field(field));
            }
        }
        Command::Fields(FieldsCommand::Add {
            label,
            field_type,
            required,
            options,
        }) => {
            let field = NewCustomField {
                label: label.trim().to_string(),
                field_type,
                required,
                options: options
                    .iter()
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect(),
            };
            validate_new_field(&field)?;
            let field = state.add_custom_field(field)?;
            println!("Added {}", describe_field(&field));
        }
        Command::Fields(FieldsCommand::Remove { id }) => {
            let id = state
                .find_custom_field(&id)
                .map(|field| field.id.clone())
                .unwrap_or(id);
            match state.remove_custom_field(&id)? {
                Some(field) => println!("Removed {}", describe_field(&field)),
                None => println!("No custom field {}", id),
            }
        }
        Command::History { summary } => {
            if summary {
                print_summary(state.identifications());
            } else if state.identifications().is_empty() {
                println!("No identifications recorded yet.");
            } else {
                for record in state.identifications() {
                    print_record(record, state.custom_fields());
                }
            }
        }
        Command::Recent => {
            for taxon in state.recent_taxa() {
                println!("{:>10}  {}", taxon.key, taxon);
            }
        }
        Command::Export { output } => {
            let path = output.unwrap_or_else(|| {
                PathBuf::from(export::default_export_filename(
                    chrono::Local::now().date_naive(),
                ))
            });
            export::save_to_csv(state.identifications(), state.custom_fields(), &path)?;
            println!(
                "Exported {} identifications to {}",
                state.identifications().len(),
                path.display()
            );
        }
        Command::Purge { yes } => {
            if !yes {
                return Err(Error::InvalidInput(
                    "purge deletes every saved identification; pass --yes to confirm".to_string(),
                )
                .into());
            }
            state.purge()?;
            info!("Data directory {} reset", data_dir.display());
            println!("All stored data removed");
        }
    }

    Ok(())
}
