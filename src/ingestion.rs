//! Parser for the DRMIS "DND Cost Center Encumbrance Report".
//!
//! The report is a windows-1252 text file: a few metadata lines, a title, a
//! pipe-delimited column header and fixed-width data lines. Parsing turns it into a
//! 20-column CSV which is then read back as [`LineItemImport`] staging rows.

use crate::error::{BftError, Result};
use crate::schema::LineItemImport;
use crate::structure::FinancialStructure;
use crate::utils::{normalize_code, parse_amount, parse_report_date};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use encoding_rs::WINDOWS_1252;
use log::{debug, error, info, warn};
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::LazyLock;

pub const REPORT_TITLE: &str = "DND Cost Center Encumbrance Report";
pub const HEADER_PREFIX: &str = "|Document N|Line Numbe|";
/// Pipe-separated fields on the header line, including the empty first and last.
pub const REPORT_COLUMNS: usize = 22;
pub const CSV_COLUMNS: usize = 20;
pub const CSV_FIELDS: [&str; CSV_COLUMNS] = [
    "docno",
    "lineno",
    "acctassno",
    "spent",
    "balance",
    "workingplan",
    "fundcenter",
    "fund",
    "costcenter",
    "internalorder",
    "doctype",
    "enctype",
    "linetext",
    "predecessordocno",
    "predecessorlineno",
    "reference",
    "gl",
    "duedate",
    "vendor",
    "createdby",
];

const FUND_CENTER_LABEL: &str = "Funds Center";
const FISCAL_YEAR_LABEL: &str = "Base Fiscal Year";
const LAYOUT_LABEL: &str = "Layout";

static DATA_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|[A-Z0-9 ]{10}\|[\s\d]{10}\|").expect("data line pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStage {
    Init,
    LocatedMetadata,
    LocatedHeaderLine,
    WroteCsv,
    Validated,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportMetadata {
    pub fiscal_year: Option<String>,
    pub fundcenter: Option<String>,
    pub layout: Option<String>,
}

impl ReportMetadata {
    pub fn is_complete(&self) -> bool {
        self.fiscal_year.is_some() && self.fundcenter.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct EncumbranceReport {
    name: String,
    lines: Vec<String>,
    metadata: ReportMetadata,
    header: Vec<String>,
    header_line: usize,
    stage: ReportStage,
}

impl EncumbranceReport {
    /// Reads a report from disk, decoding it as windows-1252.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let (text, _, had_errors) = WINDOWS_1252.decode(&bytes);
        if had_errors {
            warn!("{} contains characters outside windows-1252", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_text(name, &text))
    }

    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            lines: text.lines().map(str::to_string).collect(),
            metadata: ReportMetadata::default(),
            header: Vec::new(),
            header_line: 0,
            stage: ReportStage::Init,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> &ReportStage {
        &self.stage
    }

    pub fn metadata(&self) -> &ReportMetadata {
        &self.metadata
    }

    /// Cleaned column names read on the header line.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.stage = ReportStage::Failed(reason.into());
    }

    pub fn mark_validated(&mut self) {
        self.stage = ReportStage::Validated;
    }

    pub fn mark_done(&mut self) {
        self.stage = ReportStage::Done;
    }

    pub fn find_fund_center(line: &str) -> Option<String> {
        metadata_value(line, FUND_CENTER_LABEL).map(|fc| normalize_code(&fc))
    }

    pub fn find_base_fiscal_year(line: &str) -> Option<String> {
        metadata_value(line, FISCAL_YEAR_LABEL)
    }

    pub fn find_layout(line: &str) -> Option<String> {
        metadata_value(line, LAYOUT_LABEL)
    }

    /// Reads fiscal year, fund center and layout from the report header. The
    /// layout is optional, the other two are required.
    pub fn locate_metadata(&mut self) -> Result<&ReportMetadata> {
        let mut metadata = ReportMetadata::default();
        for line in &self.lines {
            if line.starts_with(HEADER_PREFIX) {
                break;
            }
            if metadata.fiscal_year.is_none() {
                metadata.fiscal_year = Self::find_base_fiscal_year(line);
            }
            if metadata.fundcenter.is_none() {
                metadata.fundcenter = Self::find_fund_center(line);
            }
            if metadata.layout.is_none() {
                metadata.layout = Self::find_layout(line);
            }
        }

        info!("Fiscal Year : {:?}", metadata.fiscal_year);
        info!("Fund Center : {:?}", metadata.fundcenter);
        info!("Report Layout : {:?}", metadata.layout);

        let complete = metadata.is_complete();
        self.metadata = metadata;
        if !complete {
            let err = BftError::MetadataNotFound(self.name.clone());
            error!("{}", err);
            self.fail(err.to_string());
            return Err(err);
        }
        self.stage = ReportStage::LocatedMetadata;
        Ok(&self.metadata)
    }

    /// Looks for the report title before the first blank line that follows content.
    pub fn is_dnd_cost_center_report(&self) -> bool {
        let mut seen_content = false;
        for line in &self.lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if seen_content {
                    break;
                }
                continue;
            }
            seen_content = true;
            if trimmed.trim_start_matches('|').trim_start().starts_with(REPORT_TITLE) {
                info!("Found DND Cost Center report");
                return true;
            }
        }
        error!("DID not find DND Cost center report in {}", self.name);
        false
    }

    /// 1-based number of the column header line, 0 when the report has none.
    pub fn find_header_line(&mut self) -> usize {
        let found = self.lines.iter().enumerate().find(|(_, line)| {
            line.starts_with(HEADER_PREFIX) && line.split('|').count() == REPORT_COLUMNS
        });
        match found {
            Some((idx, line)) => {
                self.header = strip_boundaries(line);
                self.header_line = idx + 1;
                self.stage = ReportStage::LocatedHeaderLine;
                debug!("Header line found at line {}", self.header_line);
            }
            None => {
                self.header.clear();
                self.header_line = 0;
                error!("Failed to find header line in {}", self.name);
            }
        }
        self.header_line
    }

    pub fn is_data_line(line: &str) -> bool {
        line.len() >= 2 && DATA_LINE.is_match(line)
    }

    /// Splits a data line into its 20 trimmed fields.
    pub fn line_to_csv(line: &str) -> Result<Vec<String>> {
        let fields = strip_boundaries(line);
        if fields.len() != CSV_COLUMNS {
            return Err(BftError::ColumnCount {
                expected: CSV_COLUMNS,
                found: fields.len(),
                line: line.to_string(),
            });
        }
        Ok(fields)
    }

    /// Lines the CSV export would contain, from the header line onward.
    pub fn data_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .skip(self.header_line.saturating_sub(1))
            .map(String::as_str)
            .filter(|line| Self::is_data_line(line))
    }

    /// Writes the canonical CSV, every field quoted, and returns the number of data
    /// rows written. Zero rows is reported, not raised.
    pub fn write_csv<W: Write>(&mut self, writer: W) -> Result<usize> {
        if self.header_line == 0 && self.find_header_line() == 0 {
            let err = BftError::HeaderLineNotFound(self.name.clone());
            self.fail(err.to_string());
            return Err(err);
        }

        let mut csv_writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(writer);
        csv_writer.write_record(CSV_FIELDS)?;

        let mut written = 0;
        for line in self
            .lines
            .iter()
            .skip(self.header_line.saturating_sub(1))
            .filter(|line| Self::is_data_line(line))
        {
            let record = Self::line_to_csv(line)?;
            csv_writer.write_record(&record)?;
            written += 1;
        }
        csv_writer.flush()?;

        if written == 0 {
            warn!("CSV file has not been written, no data lines in {}", self.name);
            self.fail("no data lines");
        } else {
            info!("{} lines written to CSV from {}", written, self.name);
            self.stage = ReportStage::WroteCsv;
        }
        Ok(written)
    }

    pub fn write_csv_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let file = File::create(path)?;
        self.write_csv(file)
    }
}

fn strip_boundaries(line: &str) -> Vec<String> {
    let mut parts: Vec<&str> = line.split('|').collect();
    if parts.len() >= 2 {
        parts.pop();
        parts.remove(0);
    }
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

/// Value of a `Label : value` or `|Label |value |` metadata line.
fn metadata_value(line: &str, label: &str) -> Option<String> {
    let rest = line
        .trim_start_matches('|')
        .trim_start()
        .strip_prefix(label)?;
    let value = match rest.trim_start().strip_prefix(':') {
        Some(after_colon) => after_colon,
        None => {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() != 4 {
                return None;
            }
            parts[2]
        }
    };
    value
        .split(|c: char| c.is_whitespace() || c == '|')
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

fn field(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or_default()
}

fn import_row(record: &StringRecord) -> Result<LineItemImport> {
    if record.len() != CSV_COLUMNS {
        return Err(BftError::ColumnCount {
            expected: CSV_COLUMNS,
            found: record.len(),
            line: record.iter().collect::<Vec<_>>().join(","),
        });
    }
    let acctassno = match field(record, 2) {
        "" => "0",
        value => value,
    };
    Ok(LineItemImport {
        docno: field(record, 0).to_string(),
        lineno: format!("{}:{}", field(record, 1), acctassno),
        spent: parse_amount(field(record, 3))?,
        balance: parse_amount(field(record, 4))?,
        workingplan: parse_amount(field(record, 5))?,
        fundcenter: normalize_code(field(record, 6)),
        fund: normalize_code(field(record, 7)),
        costcenter: normalize_code(field(record, 8)),
        internalorder: field(record, 9).to_string(),
        doctype: field(record, 10).to_string(),
        enctype: field(record, 11).to_string(),
        linetext: field(record, 12).to_string(),
        predecessordocno: field(record, 13).to_string(),
        predecessorlineno: field(record, 14).to_string(),
        reference: field(record, 15).to_string(),
        gl: field(record, 16).to_string(),
        duedate: parse_report_date(field(record, 17))?,
        vendor: field(record, 18).to_string(),
        createdby: field(record, 19).to_string(),
    })
}

/// Reads the intermediate CSV back as staging rows.
pub fn read_import_rows<R: Read>(reader: R) -> Result<Vec<LineItemImport>> {
    let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    if headers.iter().ne(CSV_FIELDS.iter().copied()) {
        return Err(BftError::InvalidCsvHeader {
            expected: CSV_FIELDS.join(","),
            found: headers.iter().collect::<Vec<_>>().join(","),
        });
    }

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        rows.push(import_row(&record?)?);
    }
    debug!("Read {} import rows", rows.len());
    Ok(rows)
}

pub fn read_import_file(path: impl AsRef<Path>) -> Result<Vec<LineItemImport>> {
    read_import_rows(File::open(path)?)
}

pub fn unique_funds(rows: &[LineItemImport]) -> BTreeSet<String> {
    rows.iter().map(|r| r.fund.clone()).collect()
}

pub fn unique_cost_centers(rows: &[LineItemImport]) -> BTreeSet<String> {
    rows.iter().map(|r| r.costcenter.clone()).collect()
}

/// Fund codes referenced by the import but unknown to the structure.
pub fn missing_funds(rows: &[LineItemImport], structure: &FinancialStructure) -> Vec<String> {
    let known = structure.fund_codes();
    unique_funds(rows)
        .into_iter()
        .filter(|fund| !known.contains(fund))
        .collect()
}

/// Cost center codes referenced by the import but unknown to the structure.
pub fn missing_cost_centers(rows: &[LineItemImport], structure: &FinancialStructure) -> Vec<String> {
    let known = structure.cost_center_codes();
    unique_cost_centers(rows)
        .into_iter()
        .filter(|cc| !known.contains(cc))
        .collect()
}

/// Spending is only legal on commitments. The first FR or PC line carrying spent
/// aborts the import.
pub fn check_spent_rule(rows: &[LineItemImport]) -> Result<()> {
    for row in rows {
        let Some(doctype) = row.effective_doctype() else {
            continue;
        };
        if !doctype.allows_spent() && row.spent != Decimal::ZERO {
            return Err(BftError::SpentOnNonCommitment {
                docno: row.docno.clone(),
                lineno: row.lineno.clone(),
                doctype: doctype.code().to_string(),
                spent: row.spent,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Fund;

    const HEADER: &str = "|Document N|Line Numbe|AcctAssNo.| Cur Year s|    Cur YR Bal|    Total Cur.|Funds Cent|Fund|Cost Cente|Order       |Document T|Encumbrance Type     |Line Text                                         |Prd.doc.no|Pred doc.i|Reference       |G/L Accoun|Due date  |Vendor nam                         |Created by  |";

    fn data_line(docno: &str, lineno: u32, spent: &str, wp: &str, cc: &str, enctype: &str) -> String {
        format!(
            "|{:<10}|{:>10}|{:>10}|{:>11}|{:>14}|{:>14}|{:<10}|{:<4}|{:<10}|{:<12}|{:<10}|{:<21}|{:<50}|{:<10}|{:<10}|{:<16}|{:<10}|{:<10}|{:<35}|{:<12}|",
            docno, lineno, "", spent, "0.00", wp, "2184A3", "C113", cc, "", "", enctype,
            "Office supplies", "", "", "", "52149", "2024.03.31", "ACME", "USER1"
        )
    }

    fn sample_report() -> String {
        let mut text = vec![
            "".to_string(),
            "DND Cost Center Encumbrance Report".to_string(),
            "".to_string(),
            "Funds Center :     2184a3 and all subordinates".to_string(),
            "Base Fiscal Year : 2024".to_string(),
            "Layout : /BFT".to_string(),
            "".to_string(),
            "-".repeat(40),
            HEADER.to_string(),
            "-".repeat(40),
        ];
        text.push(data_line("12345", 1, "1,000.00", "5,000.00", "8484WA", "Purchase Order"));
        text.push(data_line("12345", 2, "", "2,500.00", "8484WA", "Purchase Order"));
        text.push("|Total     |          |".to_string());
        text.push(data_line("RES0001", 1, "0.00", "750.00", "8484WA", "Funds Reservation"));
        text.join("\n")
    }

    #[test]
    fn test_find_metadata_values() {
        assert_eq!(
            EncumbranceReport::find_fund_center("Funds Center :     2184aa and all subordinates"),
            Some("2184AA".to_string())
        );
        assert_eq!(
            EncumbranceReport::find_fund_center("|Funds Center         |2184DA    |"),
            Some("2184DA".to_string())
        );
        assert_eq!(EncumbranceReport::find_fund_center("blablabla"), None);
        assert_eq!(
            EncumbranceReport::find_base_fiscal_year("Base Fiscal Year :2023 "),
            Some("2023".to_string())
        );
        assert_eq!(EncumbranceReport::find_base_fiscal_year("Base Fiscal Year    |2023   |"), None);
        assert_eq!(EncumbranceReport::find_base_fiscal_year("Fiscal Year:"), None);
        assert_eq!(EncumbranceReport::find_layout("Layout : /BFT"), Some("/BFT".to_string()));
    }

    #[test]
    fn test_locate_metadata() {
        let mut report = EncumbranceReport::from_text("sample.txt", &sample_report());
        let metadata = report.locate_metadata().unwrap().clone();
        assert_eq!(metadata.fundcenter.as_deref(), Some("2184A3"));
        assert_eq!(metadata.fiscal_year.as_deref(), Some("2024"));
        assert_eq!(metadata.layout.as_deref(), Some("/BFT"));
        assert_eq!(report.stage(), &ReportStage::LocatedMetadata);

        let mut bare = EncumbranceReport::from_text("bare.txt", "DND Cost Center Encumbrance Report\n");
        assert!(matches!(bare.locate_metadata(), Err(BftError::MetadataNotFound(_))));
        assert!(matches!(bare.stage(), ReportStage::Failed(_)));
    }

    #[test]
    fn test_report_title_detection() {
        let report = EncumbranceReport::from_text("sample.txt", &sample_report());
        assert!(report.is_dnd_cost_center_report());

        let other = EncumbranceReport::from_text(
            "other.txt",
            "\nDND Some Other Report\n\nDND Cost Center Encumbrance Report\n",
        );
        assert!(!other.is_dnd_cost_center_report());
    }

    #[test]
    fn test_find_header_line() {
        let mut report = EncumbranceReport::from_text("sample.txt", &sample_report());
        assert_eq!(report.find_header_line(), 9);
        assert_eq!(report.header().len(), CSV_COLUMNS);
        assert_eq!(report.header()[0], "Document N");

        let mut headless = EncumbranceReport::from_text("x.txt", "DND Cost Center Encumbrance Report\n|a|b|\n");
        assert_eq!(headless.find_header_line(), 0);
    }

    #[test]
    fn test_is_data_line() {
        assert!(EncumbranceReport::is_data_line("|14518705  |       240|"));
        assert!(EncumbranceReport::is_data_line("|1451870511|       240|"));
        assert!(!EncumbranceReport::is_data_line("|1451-8705 |       240|"));
        assert!(!EncumbranceReport::is_data_line("|Docum     |       240|"));
        assert!(!EncumbranceReport::is_data_line("Funds Center          "));
        assert!(!EncumbranceReport::is_data_line(""));
    }

    #[test]
    fn test_line_to_csv_requires_twenty_fields() {
        let good = "|col1|col2|col3|col4|col5|col6|col7|col8|col9|col10|col11|col12|col13|col14|col15|col16|col17|col18|col19|col20|";
        let fields = EncumbranceReport::line_to_csv(good).unwrap();
        assert_eq!(fields.len(), 20);
        assert_eq!(fields[19], "col20");

        let bad = "|col1|col2|col3|col4|col5|col6|col7|col8|col9|col10|col11|col12|col13|col14|col15|col16|col17|col18|col19|";
        assert!(matches!(
            EncumbranceReport::line_to_csv(bad),
            Err(BftError::ColumnCount { found: 19, .. })
        ));
    }

    #[test]
    fn test_csv_round_trip_keeps_row_count() {
        let mut report = EncumbranceReport::from_text("sample.txt", &sample_report());
        report.find_header_line();
        let expected = report.data_lines().count();

        let mut buffer = Vec::new();
        let written = report.write_csv(&mut buffer).unwrap();
        assert_eq!(written, 3);
        assert_eq!(written, expected);
        assert_eq!(report.stage(), &ReportStage::WroteCsv);

        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("\"docno\",\"lineno\",\"acctassno\""));

        let rows = read_import_rows(buffer.as_slice()).unwrap();
        assert_eq!(rows.len(), expected);
        assert_eq!(rows[0].docno, "12345");
        assert_eq!(rows[0].lineno, "1:0");
        assert_eq!(rows[0].spent, Decimal::new(100000, 2));
        assert_eq!(rows[0].workingplan, Decimal::new(500000, 2));
        assert_eq!(rows[1].spent, Decimal::ZERO);
        assert_eq!(rows[0].duedate, chrono::NaiveDate::from_ymd_opt(2024, 3, 31));
        assert_eq!(rows[2].costcenter, "8484WA");
    }

    #[test]
    fn test_write_csv_without_data_lines_reports_zero() {
        let text = format!("DND Cost Center Encumbrance Report\n{}\n", HEADER);
        let mut report = EncumbranceReport::from_text("empty.txt", &text);
        let mut buffer = Vec::new();
        assert_eq!(report.write_csv(&mut buffer).unwrap(), 0);
        assert!(matches!(report.stage(), ReportStage::Failed(_)));
    }

    #[test]
    fn test_write_csv_without_header_fails() {
        let mut report = EncumbranceReport::from_text("x.txt", "DND Cost Center Encumbrance Report\n");
        let result = report.write_csv(Vec::new());
        assert!(matches!(result, Err(BftError::HeaderLineNotFound(_))));
    }

    #[test]
    fn test_read_import_rows_rejects_wrong_header() {
        let csv = "docno,lineno\n\"1\",\"2\"\n";
        assert!(matches!(
            read_import_rows(csv.as_bytes()),
            Err(BftError::InvalidCsvHeader { .. })
        ));
    }

    #[test]
    fn test_missing_references_and_spent_rule() {
        let mut report = EncumbranceReport::from_text("sample.txt", &sample_report());
        let mut buffer = Vec::new();
        report.write_csv(&mut buffer).unwrap();
        let mut rows = read_import_rows(buffer.as_slice()).unwrap();

        let mut structure = FinancialStructure::new();
        assert_eq!(missing_funds(&rows, &structure), vec!["C113".to_string()]);
        assert_eq!(missing_cost_centers(&rows, &structure), vec!["8484WA".to_string()]);
        structure
            .add_fund(Fund::new("C113", "National Procurement", "1").unwrap())
            .unwrap();
        assert!(missing_funds(&rows, &structure).is_empty());

        assert!(check_spent_rule(&rows).is_ok());
        rows[2].spent = Decimal::from(10);
        assert!(matches!(
            check_spent_rule(&rows),
            Err(BftError::SpentOnNonCommitment { .. })
        ));
    }
}
