// Copyright 2025 Stagehand Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Vertical-bar separated staging format.
//!
//! Staged files are newline-delimited records whose fields are separated by
//! `|`. The first record is a header naming the columns in the same order the
//! bulk copy lists them. Fields containing `|`, `"` or a line break are
//! quoted CSV-style; nested objects and arrays are written as JSON; `null`
//! and missing values become empty fields. An empty string is written as
//! `""`, since the copy loads an empty field as `NULL`.
//!
//! ```text
//! a|payload|t|note
//! 1|"{""k"":""v|w""}"|2024-01-01|""
//! ```

use crate::destination::DestinationError;
use crate::schema::normalize_row;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Field delimiter of the staging format.
pub const DELIMITER: u8 = b'|';

/// Serializes rows with a header line.
///
/// Row keys are normalized before lookup so that rows produced by any
/// processor line up with the reconciled column names in `header`.
///
/// # Errors
///
/// Returns [`DestinationError::SerializationError`] if the CSV writer fails.
///
/// # Examples
///
/// ```rust
/// use stagehand_core::wire::encode_with_header;
/// use serde_json::json;
/// use std::collections::BTreeMap;
///
/// let mut row = BTreeMap::new();
/// row.insert("a".to_string(), json!(1));
/// row.insert("b".to_string(), json!("x|y"));
///
/// let bytes = encode_with_header(&["a".to_string(), "b".to_string()], &[row]).unwrap();
/// assert_eq!(String::from_utf8(bytes).unwrap(), "a|b\n1|\"x|y\"\n");
/// ```
pub fn encode_with_header(
    header: &[String],
    rows: &[BTreeMap<String, Value>],
) -> Result<Vec<u8>, DestinationError> {
    // Fields are quoted by `quote_field`, so the writer must not add its own
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(header.iter().map(|column| quote_field(column).into_owned()))
        .map_err(|e| DestinationError::serialization(e, "Failed to write staging header"))?;

    for row in rows {
        let row = normalize_row(row);
        let record: Vec<String> = header
            .iter()
            .map(|column| encode_cell(row.get(column)))
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| DestinationError::serialization(e, "Failed to write staging record"))?;
    }

    writer
        .into_inner()
        .map_err(|e| DestinationError::serialization(e.into_error(), "Failed to finish staging file"))
}

fn encode_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) if s.is_empty() => "\"\"".to_string(),
        Some(value) => quote_field(&encode_value(value)).into_owned(),
    }
}

fn quote_field(field: &str) -> Cow<'_, str> {
    if !field
        .bytes()
        .any(|b| matches!(b, DELIMITER | b'"' | b'\n' | b'\r'))
    {
        return Cow::Borrowed(field);
    }
    Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
}

/// Renders one JSON value as unquoted field text.
#[must_use]
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(columns: &[&str]) -> Vec<String> {
        columns.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_header_only_for_empty_batch() {
        let bytes = encode_with_header(&header(&["a", "b"]), &[]).unwrap();
        assert_eq!(bytes, b"a|b\n");
    }

    #[test]
    fn test_missing_and_null_fields_are_empty() {
        let mut row = BTreeMap::new();
        row.insert("a".to_string(), json!(null));
        row.insert("c".to_string(), json!(true));

        let bytes = encode_with_header(&header(&["a", "b", "c"]), &[row]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a|b|c\n||true\n");
    }

    #[test]
    fn test_objects_are_json_and_quoted_when_needed() {
        let mut row = BTreeMap::new();
        row.insert("payload".to_string(), json!({"k": "v"}));
        row.insert("note".to_string(), json!("line1\nline2"));

        let bytes = encode_with_header(&header(&["note", "payload"]), &[row]).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "note|payload\n\"line1\nline2\"|\"{\"\"k\"\":\"\"v\"\"}\"\n"
        );
    }

    #[test]
    fn test_empty_string_is_distinct_from_null() {
        let mut row = BTreeMap::new();
        row.insert("a".to_string(), json!(""));
        row.insert("b".to_string(), json!(null));
        row.insert("c".to_string(), json!("x"));

        let bytes = encode_with_header(&header(&["a", "b", "c"]), &[row]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a|b|c\n\"\"||x\n");
    }

    #[test]
    fn test_carriage_return_is_quoted() {
        let mut row = BTreeMap::new();
        row.insert("a".to_string(), json!("x\ry"));

        let bytes = encode_with_header(&header(&["a"]), &[row]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a\n\"x\ry\"\n");
    }

    #[test]
    fn test_rows_are_matched_by_normalized_key() {
        let mut row = BTreeMap::new();
        row.insert("User-Id".to_string(), json!(5));

        let bytes = encode_with_header(&header(&["user_id"]), &[row]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "user_id\n5\n");
    }
}
