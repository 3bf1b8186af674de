//! Delimiter and header detection from the first line of an upload.

use log::{debug, warn};
use regex::Regex;

/// Column order assumed when the file carries no header row.
pub const DEFAULT_COLUMNS: [&str; 8] = [
    "date",
    "course",
    "section",
    "studentusername",
    "rut",
    "name",
    "status",
    "comment",
];

const HEADER_KEYWORDS: [&str; 13] = [
    "date",
    "fecha",
    "course",
    "curso",
    "section",
    "seccion",
    "username",
    "studentusername",
    "rut",
    "status",
    "estado",
    "name",
    "nombre",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDecision {
    pub delimiter: u8,
    pub has_header: bool,
    pub columns: Vec<String>,
    /// The structured parse collapsed the header into a lone `date` column;
    /// rows must be split by hand against `DEFAULT_COLUMNS`.
    pub manual_fallback: bool,
}

pub fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Most frequent of `,` `;` and tab in `line`; comma wins ties.
pub fn detect_delimiter(line: &str) -> u8 {
    let commas = line.matches(',').count();
    let semicolons = line.matches(';').count();
    let tabs = line.matches('\t').count();

    if semicolons > commas && semicolons > tabs {
        b';'
    } else if tabs > commas && tabs > semicolons {
        b'\t'
    } else {
        b','
    }
}

pub fn looks_like_header(line: &str) -> Result<bool, regex::Error> {
    let iso_date = Regex::new(r"^\d{4}-\d{2}-\d{2}")?;
    let lower = line.to_lowercase();
    Ok(HEADER_KEYWORDS.iter().any(|kw| lower.contains(kw)) && !iso_date.is_match(line))
}

fn header_cells(line: &str, delimiter: u8) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(|c| c.trim().to_lowercase()).collect(),
        _ => vec![line.trim().to_lowercase()],
    }
}

pub fn detect(text: &str) -> Result<SchemaDecision, regex::Error> {
    let line = first_line(text);
    let delimiter = detect_delimiter(line);
    let has_header = looks_like_header(line)?;
    debug!(
        "First line {:?}: delimiter {:?}, header {}",
        line.chars().take(200).collect::<String>(),
        delimiter as char,
        has_header
    );

    if !has_header {
        debug!("No header row, using default column order");
        return Ok(SchemaDecision {
            delimiter,
            has_header,
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            manual_fallback: false,
        });
    }

    let columns = header_cells(line, delimiter);
    let manual_fallback = columns.len() == 1 && columns[0] == "date";
    if manual_fallback {
        warn!("Header parsed as a single \"date\" column, splitting rows manually");
        return Ok(SchemaDecision {
            delimiter,
            has_header,
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            manual_fallback,
        });
    }

    Ok(SchemaDecision {
        delimiter,
        has_header,
        columns,
        manual_fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_most_frequent_delimiter() {
        assert_eq!(detect_delimiter("a;b;c,d"), b';');
        assert_eq!(detect_delimiter("a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter("a,b,c"), b',');
    }

    #[test]
    fn ties_default_to_comma() {
        assert_eq!(detect_delimiter("a;b,c"), b',');
        assert_eq!(detect_delimiter("plain"), b',');
    }

    #[test]
    fn keyword_line_is_a_header() {
        let schema = detect("date,course,section,studentUsername,rut,name,status\n").unwrap();
        assert!(schema.has_header);
        assert!(!schema.manual_fallback);
        assert_eq!(schema.columns[3], "studentusername");
        assert_eq!(schema.columns.len(), 7);
    }

    #[test]
    fn spanish_semicolon_header() {
        let schema = detect("Fecha;Curso;Sección;RUT;Estado\r\n2024-03-05;1ro;A;1-9;present").unwrap();
        assert_eq!(schema.delimiter, b';');
        assert!(schema.has_header);
        assert_eq!(schema.columns, vec!["fecha", "curso", "sección", "rut", "estado"]);
    }

    #[test]
    fn iso_date_line_is_data() {
        let schema = detect("2024-03-01,1ro Básico,A,jsmith,,John,present,\n").unwrap();
        assert!(!schema.has_header);
        assert_eq!(schema.columns, DEFAULT_COLUMNS.to_vec());
    }

    #[test]
    fn data_line_with_name_like_text_but_date_prefix_is_data() {
        assert!(!looks_like_header("2024-03-01,Curso nombre,A").unwrap());
    }

    #[test]
    fn lone_date_column_triggers_manual_fallback() {
        let schema = detect("date\n\"2024-03-01,1ro,A,jsmith,,,present,\"\n").unwrap();
        assert!(schema.has_header);
        assert!(schema.manual_fallback);
        assert_eq!(schema.columns, DEFAULT_COLUMNS.to_vec());
    }
}
