//! Tabular host input: header validation and per-row parsing into candidates.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::candidate::{CandidateRecord, Credential, HostKey, HostSpec};

pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Ip,
    Port,
    Username,
    Password,
    SshKeyId,
    Hostname,
    Os,
    Description,
}

impl Column {
    const ALL: [Column; 8] = [
        Column::Ip,
        Column::Port,
        Column::Username,
        Column::Password,
        Column::SshKeyId,
        Column::Hostname,
        Column::Os,
        Column::Description,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Ip => "ip",
            Column::Port => "port",
            Column::Username => "username",
            Column::Password => "password",
            Column::SshKeyId => "ssh_key_id",
            Column::Hostname => "hostname",
            Column::Os => "os",
            Column::Description => "description",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Column::Ip => &["ip", "addr", "address", "ip_address", "host"],
            Column::Port => &["port", "ssh_port"],
            Column::Username => &["username", "user", "login"],
            Column::Password => &["password", "pass"],
            Column::SshKeyId => &["ssh_key_id", "key_id"],
            Column::Hostname => &["hostname", "name"],
            Column::Os => &["os", "operating_system"],
            Column::Description => &["description", "notes"],
        }
    }

    fn from_header(normalized: &str) -> Option<Column> {
        Column::ALL
            .into_iter()
            .find(|column| column.aliases().contains(&normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSchema {
    pub required: Vec<Column>,
    pub default_port: u16,
}

impl Default for SheetSchema {
    fn default() -> Self {
        Self {
            required: vec![Column::Ip, Column::Username, Column::Password],
            default_port: DEFAULT_SSH_PORT,
        }
    }
}

/// Sheet-level failure; nothing is parsed when one of these occurs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("the sheet is empty")]
    EmptySheet,
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("the sheet could not be read: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowErrorReason {
    MissingField(&'static str),
    InvalidAddress(String),
    InvalidPort(String),
    InvalidKeyId(String),
    DuplicateKey { key: HostKey, first_row: usize },
    Malformed(String),
}

impl fmt::Display for RowErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowErrorReason::MissingField(column) => write!(f, "missing value for {column}"),
            RowErrorReason::InvalidAddress(value) => write!(f, "invalid IP address '{value}'"),
            RowErrorReason::InvalidPort(value) => write!(f, "invalid port '{value}'"),
            RowErrorReason::InvalidKeyId(value) => write!(f, "invalid SSH key id '{value}'"),
            RowErrorReason::DuplicateKey { key, first_row } => {
                write!(f, "duplicate address {key} (first seen on row {first_row})")
            }
            RowErrorReason::Malformed(message) => write!(f, "malformed row: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {row_number}: {reason}")]
pub struct RowError {
    pub row_number: usize,
    pub reason: RowErrorReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedSheet {
    pub records: Vec<CandidateRecord>,
    pub row_errors: Vec<RowError>,
}

/// Parses CSV text into candidates. Records are numbered from 1 in row order;
/// owners re-number them when adopting the sheet.
pub fn parse_sheet(text: &str, schema: &SheetSchema) -> Result<ParsedSheet, InputError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| InputError::Unreadable(err.to_string()))?
        .clone();
    if headers.iter().all(str::is_empty) {
        return Err(InputError::EmptySheet);
    }
    let layout = HeaderLayout::resolve(&headers, schema)?;

    let mut parsed = ParsedSheet::default();
    let mut first_rows: HashMap<HostKey, usize> = HashMap::new();

    for (index, result) in reader.records().enumerate() {
        let fallback_row = index + 2;
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                let row_number = err
                    .position()
                    .map_or(fallback_row, |pos| pos.line() as usize);
                parsed.row_errors.push(RowError {
                    row_number,
                    reason: RowErrorReason::Malformed(err.to_string()),
                });
                continue;
            }
        };
        let row_number = record
            .position()
            .map_or(fallback_row, |pos| pos.line() as usize);
        if record.iter().all(str::is_empty) {
            continue;
        }

        let outcome = layout.parse_row(&record, schema).and_then(|host| {
            let key = host.key();
            match first_rows.get(&key) {
                Some(&first_row) => Err(RowErrorReason::DuplicateKey { key, first_row }),
                None => {
                    first_rows.insert(key, row_number);
                    Ok(host)
                }
            }
        });

        match outcome {
            Ok(host) => {
                let id = parsed.records.len() as u64 + 1;
                parsed.records.push(CandidateRecord::new(id, row_number, host));
            }
            Err(reason) => parsed.row_errors.push(RowError { row_number, reason }),
        }
    }

    Ok(parsed)
}

struct HeaderLayout {
    columns: HashMap<Column, usize>,
    extra: Vec<(usize, String)>,
}

impl HeaderLayout {
    fn resolve(headers: &StringRecord, schema: &SheetSchema) -> Result<Self, InputError> {
        let mut columns = HashMap::new();
        let mut extra = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            let normalized = normalize_header(header);
            if normalized.is_empty() {
                continue;
            }
            match Column::from_header(&normalized) {
                // First occurrence wins when a sheet repeats a column.
                Some(column) => {
                    columns.entry(column).or_insert(index);
                }
                None => extra.push((index, normalized)),
            }
        }

        let missing: Vec<String> = schema
            .required
            .iter()
            .filter(|column| !columns.contains_key(column))
            .map(|column| column.name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(InputError::MissingColumns(missing));
        }

        Ok(Self { columns, extra })
    }

    fn cell<'r>(&self, record: &'r StringRecord, column: Column) -> Option<&'r str> {
        self.columns
            .get(&column)
            .and_then(|&index| record.get(index))
            .filter(|value| !value.is_empty())
    }

    fn parse_row(
        &self,
        record: &StringRecord,
        schema: &SheetSchema,
    ) -> Result<HostSpec, RowErrorReason> {
        let key_id_cell = self.cell(record, Column::SshKeyId);
        for &column in &schema.required {
            let satisfied_by_key = column == Column::Password && key_id_cell.is_some();
            if self.cell(record, column).is_none() && !satisfied_by_key {
                return Err(RowErrorReason::MissingField(column.name()));
            }
        }

        let raw_address = self
            .cell(record, Column::Ip)
            .ok_or(RowErrorReason::MissingField(Column::Ip.name()))?;
        let address: IpAddr = raw_address
            .parse()
            .map_err(|_| RowErrorReason::InvalidAddress(raw_address.to_string()))?;

        let port = match self.cell(record, Column::Port) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(RowErrorReason::InvalidPort(raw.to_string())),
            },
            None => schema.default_port,
        };

        let username = self
            .cell(record, Column::Username)
            .ok_or(RowErrorReason::MissingField(Column::Username.name()))?
            .to_string();

        let credential = match (self.cell(record, Column::Password), key_id_cell) {
            (Some(password), _) => Credential::Password(password.to_string()),
            (None, Some(raw)) => raw
                .parse::<u64>()
                .map(Credential::KeyId)
                .map_err(|_| RowErrorReason::InvalidKeyId(raw.to_string()))?,
            (None, None) => return Err(RowErrorReason::MissingField(Column::Password.name())),
        };

        let extra: BTreeMap<String, String> = self
            .extra
            .iter()
            .filter_map(|(index, name)| {
                record
                    .get(*index)
                    .filter(|value| !value.is_empty())
                    .map(|value| (name.clone(), value.to_string()))
            })
            .collect();

        Ok(HostSpec {
            address,
            port,
            username,
            credential,
            hostname: self.cell(record, Column::Hostname).map(str::to_string),
            os: self.cell(record, Column::Os).map(str::to_string),
            description: self.cell(record, Column::Description).map(str::to_string),
            extra,
        })
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_ascii_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
