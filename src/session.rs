//! Interactive session: the draft lives here for as long as the session runs.

use crate::error::{Error, Result};
use crate::parse::{parse_date, parse_field_value};
use crate::record::{Confidence, DraftUpdate, IdentificationDetails};
use crate::search::{SearchDebouncer, SearchResults, TaxonSource};
use crate::state::IdentificationState;
use crate::store::KeyValueStore;
use clap::ValueEnum;
use log::error;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  ?<text>                 search GBIF as you type
  pick <n>                select search result n
  recent [n]              list recent taxa, or select recent taxon n
  set <attribute> [value] set date, observation-date, location, habitat,
                          collector, identifier, confidence, method or notes
  field <field>=<value>   set a custom field by id or label
  fields                  list custom fields
  show                    show the draft
  save                    validate and save the draft
  reset                   discard the draft
  help                    show this help
  quit                    leave the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Search(String),
    Pick(usize),
    Recent(Option<usize>),
    Set(String, String),
    Field(String, String),
    Fields,
    Show,
    Save,
    Reset,
    Help,
    Quit,
}

pub(crate) fn parse_command(line: &str) -> std::result::Result<SessionCommand, String> {
    if let Some(query) = line.trim_start().strip_prefix('?') {
        return Ok(SessionCommand::Search(query.to_string()));
    }

    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let index = |s: &str| {
        s.parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("'{}' is not a list number", s))
    };

    match word {
        "pick" => Ok(SessionCommand::Pick(index(rest)?)),
        "recent" if rest.is_empty() => Ok(SessionCommand::Recent(None)),
        "recent" => Ok(SessionCommand::Recent(Some(index(rest)?))),
        "set" => {
            let (attribute, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if attribute.is_empty() {
                return Err("usage: set <attribute> [value]".to_string());
            }
            Ok(SessionCommand::Set(attribute.to_string(), value.trim().to_string()))
        }
        "field" => {
            let (field, value) = parse_field_value(rest)?;
            Ok(SessionCommand::Field(field, value))
        }
        "fields" => Ok(SessionCommand::Fields),
        "show" => Ok(SessionCommand::Show),
        "save" => Ok(SessionCommand::Save),
        "reset" => Ok(SessionCommand::Reset),
        "help" | "" => Ok(SessionCommand::Help),
        "quit" | "exit" => Ok(SessionCommand::Quit),
        other => Err(format!("Unknown command '{}', try 'help'", other)),
    }
}

/// Patch for `set <attribute> <value>`. An empty value clears optional
/// attributes.
pub(crate) fn attribute_update(attribute: &str, value: &str) -> Result<DraftUpdate> {
    let invalid = |msg: String| Error::InvalidInput(msg);
    let date = |value: &str| parse_date(value).map_err(invalid);
    let text = Some(value.to_string());

    let mut update = DraftUpdate::default();
    match attribute {
        "date" | "identification-date" => update.identification_date = Some(date(value)?),
        "observation-date" if value.is_empty() => update.observation_date = text,
        "observation-date" => update.observation_date = Some(date(value)?),
        "location" => update.location = text,
        "habitat" => update.habitat = text,
        "collector" => update.collector = text,
        "identifier" => update.identifier = text,
        "method" => update.method = text,
        "notes" => update.notes = text,
        "confidence" => {
            let confidence = Confidence::from_str(value, true).map_err(|_| {
                invalid(format!("confidence must be high, medium or low, not '{}'", value))
            })?;
            update.confidence = Some(confidence);
        }
        other => return Err(invalid(format!("unknown attribute '{}'", other))),
    }
    Ok(update)
}

pub(crate) struct Session<'a, S: KeyValueStore, T> {
    state: &'a mut IdentificationState<S>,
    search: SearchDebouncer<T>,
}

impl<'a, S, T> Session<'a, S, T>
where
    S: KeyValueStore,
    T: TaxonSource + Send + Sync + 'static,
{
    pub fn new(state: &'a mut IdentificationState<S>, search: SearchDebouncer<T>) -> Self {
        Self { state, search }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut updates = self.search.subscribe();
        println!("{}", HELP);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match parse_command(&line) {
                        Ok(SessionCommand::Quit) => break,
                        Ok(command) => {
                            if let Err(e) = self.execute(command) {
                                if !matches!(e, Error::Validation(_)) {
                                    error!("Session command failed: {}", e);
                                }
                                println!("Error: {}", e);
                            }
                        }
                        Err(message) => println!("{}", message),
                    }
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let results = updates.borrow_and_update().clone();
                    print_results(&results);
                }
            }
        }

        self.search.cancel();
        Ok(())
    }

    pub fn execute(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::Search(query) => self.search.input(&query),
            SessionCommand::Pick(n) => {
                let results = self.search.results();
                let taxon = n
                    .checked_sub(1)
                    .and_then(|i| results.taxa.get(i))
                    .cloned()
                    .ok_or_else(|| Error::InvalidInput(format!("no search result {}", n)))?;
                self.search.cancel();
                println!("Selected {}", taxon);
                self.state.select_taxon(taxon)?;
            }
            SessionCommand::Recent(None) => {
                for (i, taxon) in self.state.recent_taxa().iter().enumerate() {
                    println!("{:>3}. {}", i + 1, taxon);
                }
            }
            SessionCommand::Recent(Some(n)) => {
                let taxon = n
                    .checked_sub(1)
                    .and_then(|i| self.state.recent_taxa().get(i))
                    .cloned()
                    .ok_or_else(|| Error::InvalidInput(format!("no recent taxon {}", n)))?;
                println!("Selected {}", taxon);
                self.state.select_taxon(taxon)?;
            }
            SessionCommand::Set(attribute, value) => {
                let update = attribute_update(&attribute, &value)?;
                self.state.update_draft(update);
            }
            SessionCommand::Field(field, value) => {
                let id = self
                    .state
                    .find_custom_field(&field)
                    .map(|f| f.id.clone())
                    .ok_or(Error::UnknownField(field))?;
                self.state.set_draft_field_value(&id, &value)?;
            }
            SessionCommand::Fields => {
                for field in self.state.custom_fields() {
                    println!("{}", crate::describe_field(field));
                }
            }
            SessionCommand::Show => self.show_draft(),
            SessionCommand::Save => {
                let record = self.state.submit_draft()?;
                println!(
                    "Identification saved successfully: {} ({})",
                    record.taxon.scientific_name, record.id
                );
            }
            SessionCommand::Reset => {
                self.state.reset_draft();
                println!("Draft discarded");
            }
            SessionCommand::Help => println!("{}", HELP),
            SessionCommand::Quit => {}
        }
        Ok(())
    }

    fn show_draft(&self) {
        let draft = self.state.draft();
        match &draft.taxon {
            Some(taxon) => println!("Taxon: {}", taxon),
            None => println!("Taxon: (none selected)"),
        }
        print_details(&draft.details);
        for field in self.state.custom_fields() {
            let value = draft.details.custom_fields.get(&field.id).map(String::as_str);
            let marker = if field.required { "*" } else { "" };
            println!("  {}{}: {}", field.label, marker, value.unwrap_or(""));
        }
    }
}

fn print_details(details: &IdentificationDetails) {
    println!("  Identification date: {}", details.identification_date);
    let optional = [
        ("Observation date", &details.observation_date),
        ("Location", &details.location),
        ("Habitat", &details.habitat),
        ("Collector", &details.collector),
        ("Identifier", &details.identifier),
        ("Method", &details.method),
        ("Notes", &details.notes),
    ];
    for (label, value) in optional {
        if let Some(value) = value {
            println!("  {}: {}", label, value);
        }
    }
    if let Some(confidence) = details.confidence {
        println!("  Confidence: {}", confidence.as_str());
    }
}

fn print_results(results: &SearchResults) {
    if results.query.is_empty() {
        return;
    }
    if results.taxa.is_empty() {
        println!("No results for '{}'", results.query);
        return;
    }
    println!("Results for '{}':", results.query);
    for (i, taxon) in results.taxa.iter().enumerate() {
        println!("{:>3}. {}", i + 1, taxon);
    }
}
