use serde::{Deserialize, Deserializer};
use std::io::Read;

#[derive(Debug)]
pub(crate) struct ScoreRow {
    /// 1-based data row, header excluded.
    pub(crate) row: usize,
    pub(crate) student_id: String,
    pub(crate) score: Option<String>,
}

pub(crate) fn parse_rows<R: Read>(reader: R) -> Result<Vec<ScoreRow>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()?
        .iter()
        .map(canonical_header)
        .collect::<Vec<_>>();
    csv_reader.set_headers(csv::StringRecord::from(headers));

    let mut rows = Vec::new();
    for (index, record) in csv_reader.deserialize::<SheetRow>().enumerate() {
        let sheet_row = record?;
        rows.push(ScoreRow {
            row: index + 1,
            student_id: sheet_row.student_id,
            score: sheet_row.score,
        });
    }

    Ok(rows)
}

const STUDENT_ID_HEADER: &str = "Student ID";
const SCORE_HEADER: &str = "Score";

/// Maps the header spellings spreadsheet exports use onto the two columns we read.
/// Unknown headers pass through and are ignored.
fn canonical_header(raw: &str) -> String {
    // Spreadsheet exports often prefix the first header with a byte-order mark.
    let trimmed = raw.trim_start_matches('\u{feff}').trim();
    let key = trimmed
        .to_ascii_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    match key.as_str() {
        "student id" | "studentid" | "student" | "admission number" | "admission no" => {
            STUDENT_ID_HEADER.to_string()
        }
        "score" | "mark" | "marks" => SCORE_HEADER.to_string(),
        _ => trimmed.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct SheetRow {
    #[serde(rename = "Student ID")]
    student_id: String,
    #[serde(rename = "Score", default, deserialize_with = "empty_string_as_none")]
    score: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
