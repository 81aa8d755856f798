use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output format for a ledger export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A record that knows how to lay itself out as one CSV row.
pub trait CsvRow {
    /// Column names, in the order `csv_fields` produces values.
    const HEADERS: &'static [&'static str];

    fn csv_fields(&self) -> Vec<String>;
}

/// Render `records` in the requested format.
pub fn render<R: Serialize + CsvRow>(
    records: &[R],
    format: ExportFormat,
) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        ExportFormat::Csv => Ok(to_csv(records)),
    }
}

fn to_csv<R: CsvRow>(records: &[R]) -> String {
    let mut out = String::new();
    push_row(&mut out, R::HEADERS.iter().map(|h| h.to_string()));
    for record in records {
        push_row(&mut out, record.csv_fields().into_iter());
    }
    out
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(&field));
    }
    out.push('\n');
}

/// RFC 4180 quoting: wrap in quotes when the field contains a delimiter,
/// a quote or a line break, doubling any embedded quotes.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Format an optional value as a CSV cell, empty when absent.
pub(crate) fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: String,
        n: u32,
    }

    impl CsvRow for Row {
        const HEADERS: &'static [&'static str] = &["name", "n"];

        fn csv_fields(&self) -> Vec<String> {
            vec![self.name.clone(), self.n.to_string()]
        }
    }

    #[test]
    fn csv_has_header_and_one_line_per_record() {
        let rows = vec![
            Row { name: "alpha".into(), n: 1 },
            Row { name: "beta".into(), n: 2 },
        ];
        let csv = render(&rows, ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["name,n", "alpha,1", "beta,2"]);
    }

    #[test]
    fn csv_quotes_commas_quotes_and_newlines() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn json_is_a_pretty_array() {
        let rows = vec![Row { name: "x".into(), n: 3 }];
        let json = render(&rows, ExportFormat::Json).unwrap();
        assert!(json.starts_with("[\n"));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["n"], 3);
    }

    #[test]
    fn empty_csv_is_just_the_header() {
        let rows: Vec<Row> = Vec::new();
        assert_eq!(render(&rows, ExportFormat::Csv).unwrap(), "name,n\n");
    }
}
