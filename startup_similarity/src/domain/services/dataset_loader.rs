use std::collections::HashSet;
use std::path::{Path, PathBuf};

use common::helper::error_chain_fmt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::domain::{
    entities::dataset_record::{DatasetRecord, Payload, PayloadValue},
    services::helpers::clean_text,
};

const NAME_COLUMNS: [&str; 2] = ["name", "company"];
const DESCRIPTION_COLUMNS: [&str; 2] = ["description", "pitch"];

/// Records of a dataset file, in file order, and the rows that were left out
#[derive(Debug)]
pub struct LoadedDataset {
    pub records: Vec<DatasetRecord>,
    pub skipped_rows: Vec<SkippedRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based line in the file, the header being line 1
    pub line: u64,
    pub reason: String,
}

/// Reads a CSV dataset of startups.
///
/// The header must contain a `name` (or `company`) and a `description` (or `pitch`)
/// column, matched case-insensitively. Other columns become payload fields keyed by
/// their snake_cased header.
///
/// Rows missing a name or a description, unreadable rows and rows repeating the key of
/// an earlier row are skipped with a warning. The load fails if no row is usable.
#[tracing::instrument(name = "Loading dataset")]
pub fn load_dataset(path: &Path) -> Result<LoadedDataset, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|source| DatasetError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|source| DatasetError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?
        .iter()
        .map(clean_text)
        .collect();

    let columns = Columns::from_headers(&headers)?;

    let mut records = Vec::new();
    let mut skipped_rows = Vec::new();
    let mut seen_keys = HashSet::new();
    let mut row_count = 0usize;

    for (index, row) in reader.records().enumerate() {
        row_count += 1;
        // Header is line 1
        let line = row
            .as_ref()
            .ok()
            .and_then(|row| row.position())
            .map(|position| position.line())
            .unwrap_or(index as u64 + 2);

        let outcome = row
            .map_err(|error| format!("unreadable row: {}", error))
            .and_then(|row| columns.to_record(&row));

        match outcome {
            Ok(record) => {
                if seen_keys.insert(record.key()) {
                    records.push(record);
                } else {
                    let reason = format!("duplicate of an earlier row for {:?}", record.name());
                    skip(&mut skipped_rows, line, reason);
                }
            }
            Err(reason) => skip(&mut skipped_rows, line, reason),
        }
    }

    if row_count > 0 && records.is_empty() {
        return Err(DatasetError::NoValidRows {
            path: path.to_path_buf(),
            skipped: skipped_rows.len(),
        });
    }

    info!(
        records = records.len(),
        skipped = skipped_rows.len(),
        "Loaded dataset"
    );
    Ok(LoadedDataset {
        records,
        skipped_rows,
    })
}

fn skip(skipped_rows: &mut Vec<SkippedRow>, line: u64, reason: String) {
    warn!(line, %reason, "Skipping dataset row");
    skipped_rows.push(SkippedRow { line, reason });
}

/// Position of the required columns and payload keys of the others
struct Columns {
    name: usize,
    description: usize,
    extra: Vec<(usize, String)>,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Result<Self, DatasetError> {
        let find = |candidates: &[&str]| {
            candidates.iter().find_map(|candidate| {
                headers
                    .iter()
                    .position(|header| header.eq_ignore_ascii_case(candidate))
            })
        };

        let name = find(&NAME_COLUMNS[..]).ok_or(DatasetError::MissingColumn("name"))?;
        let description =
            find(&DESCRIPTION_COLUMNS[..]).ok_or(DatasetError::MissingColumn("description"))?;

        let extra = headers
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != name && *index != description)
            .map(|(index, header)| (index, field_key(header)))
            .filter(|(_, key)| !key.is_empty())
            .collect();

        Ok(Self {
            name,
            description,
            extra,
        })
    }

    fn to_record(&self, row: &csv::StringRecord) -> Result<DatasetRecord, String> {
        let cell = |index: usize| row.get(index).map(clean_text).unwrap_or_default();

        let name = cell(self.name);
        if name.is_empty() {
            return Err("missing name".into());
        }
        let description = cell(self.description);
        if description.is_empty() {
            return Err(format!("missing description for {:?}", name));
        }

        let mut fields = Payload::new();
        for (index, key) in &self.extra {
            let value = cell(*index);
            if !value.is_empty() {
                fields.entry(key.clone()).or_insert_with(|| parse_value(value));
            }
        }

        Ok(DatasetRecord::new(name, description, fields))
    }
}

/// Snake-cases a header: `Valuation ($B)` gives `valuation_b`
fn field_key(header: &str) -> String {
    static NON_ALPHANUMERIC: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid separator regex"));
    NON_ALPHANUMERIC
        .replace_all(&header.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

/// Numbers, possibly written as amounts like `$1,500` or `$2.5B`, become numeric fields.
///
/// The `B` suffix is only read on `$` amounts, and digits with a leading zero (`007`)
/// stay text: both are codes rather than quantities.
fn parse_value(value: String) -> PayloadValue {
    let trimmed = value.trim();
    let number = match trimmed.strip_prefix('$') {
        Some(amount) => amount.strip_suffix(&['B', 'b'][..]).unwrap_or(amount),
        None => trimmed,
    }
    .replace(',', "");

    if has_leading_zero(&number) {
        return PayloadValue::Text(value);
    }
    match number.parse::<f64>() {
        Ok(number) if number.is_finite() => PayloadValue::Number(number),
        _ => PayloadValue::Text(value),
    }
}

/// `007` or `-01`, but neither `0` nor `0.5`
fn has_leading_zero(number: &str) -> bool {
    let mut digits = number.trim_start_matches(&['-', '+'][..]).chars();
    digits.next() == Some('0') && digits.next().map_or(false, |c| c.is_ascii_digit())
}

#[derive(thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset {} could not be read", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Dataset header has no {0} column")]
    MissingColumn(&'static str),
    #[error("No usable row in dataset {}, {skipped} row(s) skipped", .path.display())]
    NoValidRows { path: PathBuf, skipped: usize },
}

impl std::fmt::Debug for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
