//! Parsers for the text output of scheduler CLI tools.
//!
//! Everything here is pure: input text in, maps out. The adaptors turn a
//! [`ParseError`] into a [`SchedulerError`] naming themselves.

use std::collections::HashMap;

use corvus_core::prelude::*;
use corvus_local::command::CommandOutput;
use thiserror::Error;

pub type Record = HashMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("output has no header line")]
    MissingHeader,

    #[error("column {0} missing from header")]
    MissingColumn(String),

    #[error("line {line} has {found} fields, expected {expected}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("duplicate key {0}")]
    DuplicateKey(String),
}

impl ParseError {
    pub fn into_scheduler_error(self, adaptor: &str, command: &str) -> SchedulerError {
        SchedulerError::adaptor(adaptor, format!("Cannot parse output of {command}: {self}"))
    }
}

/// Parses `key<separator>value` lines, as printed by `scontrol show config`.
///
/// Keys and values are trimmed. Blank lines and lines without the separator (titles,
/// section headers) are skipped. The first occurrence of a key wins.
pub fn parse_key_value_lines(input: &str, separator: char) -> Record {
    let mut result = Record::new();
    for line in input.lines() {
        let Some((key, value)) = line.split_once(separator) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        result
            .entry(key.to_string())
            .or_insert_with(|| value.trim().to_string());
    }
    result
}

/// Parses blank-line separated records of whitespace separated `key=value` tokens,
/// as printed by `scontrol show job`.
///
/// A token without `=` continues the value of the previous key, so values with
/// spaces (`Reason=Some reason`) survive.
pub fn parse_key_value_records(input: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut current = Record::new();
    let mut last_key: Option<String> = None;

    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            last_key = None;
            continue;
        }

        for token in line.split_whitespace() {
            match token.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    current.insert(key.to_string(), value.to_string());
                    last_key = Some(key.to_string());
                }
                _ => {
                    if let Some(value) = last_key.as_ref().and_then(|k| current.get_mut(k)) {
                        value.push(' ');
                        value.push_str(token);
                    }
                }
            }
        }
    }

    if !current.is_empty() {
        records.push(current);
    }
    records
}

/// Parses a table whose first line is a header and whose columns are separated by
/// runs of whitespace, as printed by `squeue`. Rows are keyed by the value of the
/// `key` column.
pub fn parse_whitespace_table(input: &str, key: &str) -> Result<HashMap<String, Record>, ParseError> {
    parse_table(input, key, |line| {
        line.split_whitespace().map(str::to_string).collect()
    })
}

/// Parses a table whose columns are separated by `separator`, as printed by
/// `sacct --parsable2` and `sacct -p`. A trailing separator is ignored.
pub fn parse_separated_table(
    input: &str,
    separator: char,
    key: &str,
) -> Result<HashMap<String, Record>, ParseError> {
    parse_table(input, key, |line| {
        let line = line.strip_suffix(separator).unwrap_or(line);
        line.split(separator).map(|f| f.trim().to_string()).collect()
    })
}

fn parse_table(
    input: &str,
    key: &str,
    split: impl Fn(&str) -> Vec<String>,
) -> Result<HashMap<String, Record>, ParseError> {
    let mut lines = input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(ParseError::MissingHeader);
    };
    let columns = split(header);
    if !columns.iter().any(|c| c == key) {
        return Err(ParseError::MissingColumn(key.to_string()));
    }

    let mut rows = HashMap::new();
    for (index, line) in lines {
        let fields = split(line);
        if fields.len() != columns.len() {
            return Err(ParseError::FieldCount {
                line: index + 1,
                expected: columns.len(),
                found: fields.len(),
            });
        }

        let row: Record = columns.iter().cloned().zip(fields).collect();
        let id = row.get(key).cloned().unwrap_or_default();
        if rows.insert(id.clone(), row).is_some() {
            return Err(ParseError::DuplicateKey(id));
        }
    }

    Ok(rows)
}

/// Fails unless a command printed nothing at all.
pub fn check_empty_output(
    output: &CommandOutput,
    adaptor: &str,
    command: &str,
) -> Result<(), SchedulerError> {
    if !output.success() {
        return Err(SchedulerError::adaptor(
            adaptor,
            format!(
                "{command} failed with exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
        ));
    }

    if !output.stdout.trim().is_empty() || !output.stderr.trim().is_empty() {
        return Err(SchedulerError::adaptor(
            adaptor,
            format!(
                "{command} produced unexpected response: {}{}",
                output.stdout.trim(),
                output.stderr.trim()
            ),
        ));
    }

    Ok(())
}
