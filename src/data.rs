use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::{ReaderBuilder, Trim};
use std::collections::BTreeSet;
use std::io::Cursor;

/// Stored in place of any text attribute the upload left blank.
pub const INCOMPLETE: &str = "Incomplete";
/// Stored in place of any numeric attribute the upload left blank.
pub const MISSING_NUMBER: f64 = -1.0;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Only CSV and Excel files are supported")]
    UnsupportedFormat,
    #[error("Uploaded file contains no rows")]
    Empty,
    #[error("Error reading CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Error reading Excel workbook: {0}")]
    Excel(#[from] calamine::Error),
}

/// One uploaded row after header normalization. `None` marks a missing cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentRow {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub sex: Option<String>,
    pub program: Option<String>,
    pub municipality: Option<String>,
    pub income: Option<f64>,
    pub shs_type: Option<String>,
    pub shs_origin: Option<String>,
    pub gwa: Option<f64>,
}

impl StudentRow {
    pub fn honors(&self) -> &'static str {
        classify_honors(self.gwa)
    }

    pub fn income_category(&self) -> &'static str {
        classify_income(self.income)
    }

    pub fn is_complete(&self) -> bool {
        let texts = [
            &self.firstname,
            &self.lastname,
            &self.sex,
            &self.program,
            &self.municipality,
            &self.shs_type,
            &self.shs_origin,
        ];
        is_complete(
            texts.iter().map(|t| t.as_deref().unwrap_or("")),
            self.gwa.unwrap_or(MISSING_NUMBER),
            self.income.unwrap_or(MISSING_NUMBER),
        )
    }
}

struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

// Canonical column followed by the header spellings accepted for it.
const COLUMN_ALIASES: &[(&str, &[&str])] = &[
    ("firstname", &["firstname", "first name", "fname"]),
    ("lastname", &["lastname", "last name", "surname", "lname"]),
    ("name", &["name", "fullname", "student name", "student_name"]),
    ("sex", &["sex", "gender"]),
    ("program", &["program", "course"]),
    ("municipality", &["municipality", "city", "town"]),
    (
        "income",
        &["income", "family income", "family_income", "household_income"],
    ),
    ("shs_type", &["shs_type", "shs type", "senior high", "shs"]),
    (
        "shs_origin",
        &[
            "shs_origin",
            "shs origin",
            "senior high school",
            "senior high school name",
            "school origin",
            "school_origin",
            "shs_school",
            "high school",
            "high school origin",
            "school",
        ],
    ),
    (
        "gwa",
        &["gwa", "general weighted average", "general_weighted_average"],
    ),
];

/// Parse an uploaded CSV or XLSX file into normalized student rows.
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<Vec<StudentRow>, IngestError> {
    let lower = filename.to_ascii_lowercase();
    let table = if lower.ends_with(".csv") {
        read_csv(bytes)?
    } else if lower.ends_with(".xlsx") {
        read_xlsx(bytes)?
    } else {
        return Err(IngestError::UnsupportedFormat);
    };

    let rows = normalize_table(&table);
    if rows.is_empty() {
        return Err(IngestError::Empty);
    }
    Ok(rows)
}

pub fn is_supported_filename(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.ends_with(".csv") || lower.ends_with(".xlsx")
}

fn read_csv(bytes: &[u8]) -> Result<RawTable, IngestError> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = rdr.headers()?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(String::from).collect());
    }

    Ok(RawTable { headers, rows })
}

fn read_xlsx(bytes: &[u8]) -> Result<RawTable, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook.worksheet_range_at(0).ok_or(IngestError::Empty)??;

    let mut sheet_rows = range.rows();
    let headers = match sheet_rows.next() {
        Some(header_row) => header_row.iter().map(cell_text).collect(),
        None => return Err(IngestError::Empty),
    };
    let rows = sheet_rows
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    Ok(RawTable { headers, rows })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

fn column_index(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}

fn normalize_table(table: &RawTable) -> Vec<StudentRow> {
    let headers: Vec<String> = table
        .headers
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let index = |canonical: &str| {
        COLUMN_ALIASES
            .iter()
            .find(|(name, _)| *name == canonical)
            .and_then(|(_, aliases)| column_index(&headers, aliases))
    };

    let firstname_idx = index("firstname");
    let lastname_idx = index("lastname");
    let name_idx = index("name");
    let split_name = name_idx.is_some() && (firstname_idx.is_none() || lastname_idx.is_none());

    let sex_idx = index("sex");
    let program_idx = index("program");
    let municipality_idx = index("municipality");
    let income_idx = index("income");
    let shs_type_idx = index("shs_type");
    let shs_origin_idx = index("shs_origin");
    let gwa_idx = index("gwa");

    table
        .rows
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            let text = |idx: Option<usize>| idx.and_then(|i| row.get(i)).and_then(|v| clean_text(v));
            let number = |idx: Option<usize>| idx.and_then(|i| row.get(i)).and_then(|v| clean_number(v));

            let (firstname, lastname) = if split_name {
                split_full_name(text(name_idx).as_deref())
            } else {
                (text(firstname_idx), text(lastname_idx))
            };

            StudentRow {
                firstname,
                lastname,
                sex: text(sex_idx),
                program: text(program_idx),
                municipality: text(municipality_idx),
                income: number(income_idx),
                shs_type: text(shs_type_idx),
                shs_origin: text(shs_origin_idx),
                gwa: number(gwa_idx),
            }
        })
        .collect()
}

fn split_full_name(name: Option<&str>) -> (Option<String>, Option<String>) {
    match name {
        Some(full) => match full.split_once(' ') {
            Some((first, last)) => (clean_text(first), clean_text(last)),
            None => (clean_text(full), None),
        },
        None => (None, None),
    }
}

/// True for cells the upload left blank or marked as not applicable.
pub fn is_missing_text(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || ["n/a", "na", "none", "nan"]
            .iter()
            .any(|m| trimmed.eq_ignore_ascii_case(m))
}

pub fn clean_text(value: &str) -> Option<String> {
    if is_missing_text(value) {
        None
    } else {
        Some(value.trim().to_string())
    }
}

pub fn clean_number(value: &str) -> Option<f64> {
    clean_text(value)
        .and_then(|v| v.replace(',', "").parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
}

pub fn classify_honors(gwa: Option<f64>) -> &'static str {
    match gwa {
        Some(g) if g >= 98.0 => "With Highest Honors",
        Some(g) if g >= 95.0 => "With High Honors",
        Some(g) if g >= 90.0 => "With Honors",
        Some(g) if g > 0.0 => "No Honors",
        _ => INCOMPLETE,
    }
}

/// Monthly family income bands.
pub fn classify_income(income: Option<f64>) -> &'static str {
    match income {
        Some(i) if i < 0.0 => INCOMPLETE,
        Some(i) if i < 10_957.0 => "Poor",
        Some(i) if i < 21_914.0 => "Low Income",
        Some(i) if i < 43_828.0 => "Lower Middle Income",
        Some(i) if i < 76_669.0 => "Middle Income",
        Some(i) if i < 131_484.0 => "Upper Middle Income",
        Some(i) if i < 219_140.0 => "Upper Income",
        Some(_) => "Rich",
        None => INCOMPLETE,
    }
}

/// Text attributes must be present and known, GWA positive, income non-negative.
pub fn is_complete<'a>(texts: impl IntoIterator<Item = &'a str>, gwa: f64, income: f64) -> bool {
    let texts_ok = texts.into_iter().all(|t| {
        !is_missing_text(t) && t != INCOMPLETE && !t.trim().eq_ignore_ascii_case("unknown")
    });
    texts_ok && gwa > 0.0 && income >= 0.0
}

/// Sorted-category label encoding. Returns one code per value plus the category list.
pub fn label_encode(values: &[&str]) -> (Vec<f64>, Vec<String>) {
    let categories: Vec<String> = values
        .iter()
        .map(|v| categorical_value(v))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let codes = values
        .iter()
        .map(|v| {
            let v = categorical_value(v);
            categories.iter().position(|c| *c == v).unwrap_or(0) as f64
        })
        .collect();

    (codes, categories)
}

fn categorical_value(value: &str) -> String {
    if is_missing_text(value) {
        "Unknown".to_string()
    } else {
        value.trim().to_string()
    }
}

pub fn area_type(municipality: &str, urban_municipalities: &[String]) -> &'static str {
    if is_missing_text(municipality) || municipality == INCOMPLETE {
        "Unknown"
    } else if urban_municipalities
        .iter()
        .any(|m| m.trim().eq_ignore_ascii_case(municipality.trim()))
    {
        "Urban"
    } else {
        "Rural"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
First Name,Last Name,Gender,Course,City,Family Income,SHS Type,School,GWA
Ana,Reyes,F,BSIT,Calamba,15000,Public,Calamba NHS,96
Ben,Cruz,M,BSCS,Los Banos,,Private,St. Mary,91.5
Carla,Santos,F,BSIT,N/A,45000,Public,Laguna SHS,88
,,,,,,,,
";

    #[test]
    fn test_parse_csv_with_aliases() {
        let rows = parse_upload("students.csv", SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);

        let ana = &rows[0];
        assert_eq!(ana.firstname.as_deref(), Some("Ana"));
        assert_eq!(ana.sex.as_deref(), Some("F"));
        assert_eq!(ana.program.as_deref(), Some("BSIT"));
        assert_eq!(ana.shs_origin.as_deref(), Some("Calamba NHS"));
        assert_eq!(ana.income, Some(15000.0));
        assert_eq!(ana.honors(), "With High Honors");
        assert_eq!(ana.income_category(), "Low Income");
        assert!(ana.is_complete());

        assert_eq!(rows[1].income, None);
        assert!(!rows[1].is_complete());
        assert_eq!(rows[2].municipality, None);
        assert!(!rows[2].is_complete());
    }

    #[test]
    fn test_parse_xlsx_workbook() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["Firstname", "Lastname", "Family Income", "GWA"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_string(1, 0, "Ana").unwrap();
        sheet.write_string(1, 1, "Reyes").unwrap();
        sheet.write_number(1, 2, 15000.0).unwrap();
        sheet.write_number(1, 3, 96.5).unwrap();
        sheet.write_string(2, 0, "Ben").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let rows = parse_upload("Students.XLSX", &bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lastname.as_deref(), Some("Reyes"));
        assert_eq!(rows[0].income, Some(15000.0));
        assert_eq!(rows[0].gwa, Some(96.5));
        assert_eq!(rows[1].gwa, None);
    }

    #[test]
    fn test_full_name_is_split() {
        let csv = "Student Name,GWA\nMaria Clara Dela Cruz,92\nPlato,85\n";
        let rows = parse_upload("names.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows[0].firstname.as_deref(), Some("Maria"));
        assert_eq!(rows[0].lastname.as_deref(), Some("Clara Dela Cruz"));
        assert_eq!(rows[1].firstname.as_deref(), Some("Plato"));
        assert_eq!(rows[1].lastname, None);
    }

    #[test]
    fn test_unsupported_and_empty_uploads() {
        assert!(matches!(
            parse_upload("notes.txt", b"a,b"),
            Err(IngestError::UnsupportedFormat)
        ));
        assert!(matches!(
            parse_upload("empty.csv", b"gwa,income\n"),
            Err(IngestError::Empty)
        ));
    }

    #[test]
    fn test_classifiers() {
        assert_eq!(classify_honors(Some(98.0)), "With Highest Honors");
        assert_eq!(classify_honors(Some(90.0)), "With Honors");
        assert_eq!(classify_honors(Some(75.0)), "No Honors");
        assert_eq!(classify_honors(None), INCOMPLETE);
        assert_eq!(classify_honors(Some(MISSING_NUMBER)), INCOMPLETE);

        assert_eq!(classify_income(Some(5_000.0)), "Poor");
        assert_eq!(classify_income(Some(50_000.0)), "Middle Income");
        assert_eq!(classify_income(Some(500_000.0)), "Rich");
        assert_eq!(classify_income(Some(MISSING_NUMBER)), INCOMPLETE);
    }

    #[test]
    fn test_clean_number() {
        assert_eq!(clean_number(" 25,000 "), Some(25000.0));
        assert_eq!(clean_number("none"), None);
        assert_eq!(clean_number("abc"), None);
        assert_eq!(clean_number("-1"), None);
    }

    #[test]
    fn test_label_encode_is_sorted() {
        let (codes, categories) = label_encode(&["M", "F", "", "F"]);
        assert_eq!(categories, vec!["F", "M", "Unknown"]);
        assert_eq!(codes, vec![1.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_area_type() {
        let urban = vec!["Calamba".to_string()];
        assert_eq!(area_type("calamba", &urban), "Urban");
        assert_eq!(area_type("Bay", &urban), "Rural");
        assert_eq!(area_type(INCOMPLETE, &urban), "Unknown");
    }
}
