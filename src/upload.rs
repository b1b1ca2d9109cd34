//! Upload pipelines: the encumbrance report import and the CSV loaders for the
//! financial structure and allocations.
//!
//! Validation failures are returned as [`UploadOutcome::Rejected`] when the upload
//! comes from an interactive request and as errors when it comes from a command.

use crate::allocation::AllocationLedger;
use crate::config::{BftConfig, PeriodContext};
use crate::error::{BftError, Result};
use crate::forecast::ForecastEngine;
use crate::ingestion::{
    check_spent_rule, missing_cost_centers, missing_funds, read_import_file, unique_cost_centers,
    EncumbranceReport,
};
use crate::lineitems::LineItemBook;
use crate::reconcile::{EncumbranceReconciler, ReconcileSummary};
use crate::schema::{Allocation, Fund, LineItemImport, NewCostCenter, NewFundCenter, OrgNode, Quarter};
use crate::structure::FinancialStructure;
use crate::utils::{normalize_code, parse_amount};
use csv::{ReaderBuilder, StringRecord};
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

pub const FUND_HEADER: [&str; 3] = ["fund", "name", "vote"];
pub const SOURCE_HEADER: [&str; 1] = ["source"];
pub const FUND_CENTER_HEADER: [&str; 3] = ["fundcenter_parent", "fundcenter", "shortname"];
pub const COST_CENTER_HEADER: [&str; 7] = [
    "costcenter_parent",
    "costcenter",
    "shortname",
    "isforecastable",
    "isupdatable",
    "source",
    "fund",
];
pub const FUND_CENTER_ALLOCATION_HEADER: [&str; 6] =
    ["fundcenter", "fund", "fy", "quarter", "amount", "note"];
pub const COST_CENTER_ALLOCATION_HEADER: [&str; 6] =
    ["costcenter", "fund", "fy", "quarter", "amount", "note"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadMode {
    /// Interactive upload. Validation failures are logged and reported back.
    Request,
    /// Management command. Validation failures are raised.
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadScope {
    FundCenter(String),
    CostCenter { costcenter: String, fundcenter: String },
}

impl UploadScope {
    fn costcenter(&self) -> Option<&str> {
        match self {
            UploadScope::FundCenter(_) => None,
            UploadScope::CostCenter { costcenter, .. } => Some(costcenter.as_str()),
        }
    }

    fn fundcenter(&self) -> &str {
        match self {
            UploadScope::FundCenter(fundcenter) => fundcenter,
            UploadScope::CostCenter { fundcenter, .. } => fundcenter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome<T> {
    Completed(T),
    Rejected { reason: String },
}

impl<T> UploadOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            UploadOutcome::Completed(value) => Some(value),
            UploadOutcome::Rejected { .. } => None,
        }
    }

    pub fn rejection(&self) -> Option<&str> {
        match self {
            UploadOutcome::Completed(_) => None,
            UploadOutcome::Rejected { reason } => Some(reason),
        }
    }
}

fn settle<T>(mode: UploadMode, context: &str, err: BftError) -> Result<UploadOutcome<T>> {
    error!("{}: {}", context, err);
    match mode {
        UploadMode::Request => Ok(UploadOutcome::Rejected {
            reason: err.to_string(),
        }),
        UploadMode::Command => Err(err),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncumbranceSummary {
    pub report: String,
    pub fundcenter: String,
    pub rows: usize,
    pub reconcile: ReconcileSummary,
    pub history_records: usize,
    pub underforecasted: usize,
    pub overforecasted: usize,
}

/// Runs an encumbrance report through parsing, validation, reconciliation and the
/// forecast corrections.
pub struct LineItemUpload<'a> {
    config: &'a BftConfig,
    structure: &'a FinancialStructure,
    mode: UploadMode,
}

impl<'a> LineItemUpload<'a> {
    pub fn new(config: &'a BftConfig, structure: &'a FinancialStructure, mode: UploadMode) -> Self {
        Self {
            config,
            structure,
            mode,
        }
    }

    /// Opens `file_name` from the configured DRMIS directory and processes it.
    pub fn run(
        &self,
        file_name: impl AsRef<Path>,
        scope: &UploadScope,
        book: &mut LineItemBook,
    ) -> Result<UploadOutcome<EncumbranceSummary>> {
        let mut report = EncumbranceReport::open(self.config.report_path(file_name))?;
        self.run_report(&mut report, scope, book)
    }

    pub fn run_report(
        &self,
        report: &mut EncumbranceReport,
        scope: &UploadScope,
        book: &mut LineItemBook,
    ) -> Result<UploadOutcome<EncumbranceSummary>> {
        info!("Begin upload processing of {}", report.name());
        let rows = match self.validate(report, scope) {
            Ok(rows) => rows,
            Err(err @ BftError::SpentOnNonCommitment { .. }) => {
                error!("Line items upload of {}: {}", report.name(), err);
                report.fail(err.to_string());
                return Err(err);
            }
            Err(err) => {
                report.fail(err.to_string());
                return settle(self.mode, &format!("Line items upload of {}", report.name()), err);
            }
        };
        report.mark_validated();

        let row_count = rows.len();
        book.replace_imports(rows);
        info!("{} lines have been written to encumbrance import table", row_count);

        let reconciler = EncumbranceReconciler::new(self.structure);
        let reconcile = reconciler.reconcile(book, scope.costcenter());

        let engine = ForecastEngine::new(self.structure);
        let history_records = engine.set_encumbrance_history_record(book, scope.costcenter());
        let underforecasted = engine.set_underforecasted(book, scope.costcenter());
        let overforecasted = engine.set_overforecasted(book, scope.costcenter());

        report.mark_done();
        info!("BFT download complete");
        Ok(UploadOutcome::Completed(EncumbranceSummary {
            report: report.name().to_string(),
            fundcenter: report.metadata().fundcenter.clone().unwrap_or_default(),
            rows: row_count,
            reconcile,
            history_records,
            underforecasted,
            overforecasted,
        }))
    }

    fn check_scope(&self, scope: &UploadScope) -> Result<()> {
        match scope {
            UploadScope::FundCenter(fundcenter) => {
                self.structure.require_fund_center(fundcenter)?;
            }
            UploadScope::CostCenter {
                costcenter,
                fundcenter,
            } => {
                let cost_center = self.structure.require_cost_center(costcenter)?;
                if !cost_center.isupdatable {
                    return Err(BftError::CostCenterNotUpdatable(cost_center.costcenter.clone()));
                }
                self.structure.require_fund_center(fundcenter)?;
                if !self.structure.is_child_of(fundcenter, costcenter)? {
                    return Err(BftError::NotDirectChild {
                        parent: normalize_code(fundcenter),
                        child: cost_center.costcenter.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate(&self, report: &mut EncumbranceReport, scope: &UploadScope) -> Result<Vec<LineItemImport>> {
        self.check_scope(scope)?;

        let metadata = report.locate_metadata()?.clone();
        let found_fy = metadata.fiscal_year.unwrap_or_default();
        if found_fy.parse::<i32>().ok() != Some(self.config.period.fy) {
            return Err(BftError::FiscalYearMismatch {
                expected: self.config.period.fy,
                found: found_fy,
            });
        }
        // For a cost center upload this is the cost center's parent, checked above.
        let requested = normalize_code(scope.fundcenter());
        let found = metadata.fundcenter.unwrap_or_default();
        if requested != found {
            return Err(BftError::FundCenterMismatch { requested, found });
        }

        if !report.is_dnd_cost_center_report() {
            return Err(BftError::NotDndReport(report.name().to_string()));
        }
        info!("We have a DND Cost center encumbrance report.");

        if report.find_header_line() == 0 {
            return Err(BftError::HeaderLineNotFound(report.name().to_string()));
        }
        let csv_path = self.config.csv_path();
        if report.write_csv_file(&csv_path)? == 0 {
            return Err(BftError::EmptyReport(report.name().to_string()));
        }
        let rows = read_import_file(&csv_path)?;

        let funds = missing_funds(&rows, self.structure);
        if !funds.is_empty() {
            return Err(BftError::MissingFunds(funds));
        }
        let cost_centers = missing_cost_centers(&rows, self.structure);
        if !cost_centers.is_empty() {
            return Err(BftError::MissingCostCenters(cost_centers));
        }

        if let Some(requested) = scope.costcenter() {
            let requested = normalize_code(requested);
            let found: Vec<String> = unique_cost_centers(&rows).into_iter().collect();
            if found.len() > 1 {
                return Err(BftError::MultipleCostCenters(found));
            }
            if found.first().is_some_and(|cc| *cc != requested) {
                return Err(BftError::UploadRejected(format!(
                    "report is for cost center {}, not {}",
                    found.join(","),
                    requested
                )));
            }
        }

        check_spent_rule(&rows)?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub saved: usize,
    pub skipped: Vec<String>,
}

impl LoadSummary {
    fn record(&mut self, what: &str, result: Result<()>) {
        match result {
            Ok(()) => self.saved += 1,
            Err(err) => {
                warn!("Saving {} generates {}", what, err);
                self.skipped.push(format!("{}: {}", what, err));
            }
        }
    }
}

fn read_records<R: Read>(reader: R, expected: &[&str]) -> Result<Vec<StringRecord>> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    if headers.iter().ne(expected.iter().copied()) {
        return Err(BftError::InvalidCsvHeader {
            expected: expected.join(","),
            found: headers.iter().collect::<Vec<_>>().join(","),
        });
    }
    let mut records = Vec::new();
    for record in csv_reader.records() {
        records.push(record?);
    }
    Ok(records)
}

fn column<'r>(record: &'r StringRecord, idx: usize) -> &'r str {
    record.get(idx).unwrap_or_default()
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" | "" => Ok(false),
        _ => Err(BftError::UploadRejected(format!("invalid flag '{}'", raw))),
    }
}

/// Bulk loaders for funds, sources, fund centers and cost centers. Rows that fail
/// to save are logged and skipped.
pub struct StructureLoader<'a> {
    structure: &'a mut FinancialStructure,
    mode: UploadMode,
}

impl<'a> StructureLoader<'a> {
    pub fn new(structure: &'a mut FinancialStructure, mode: UploadMode) -> Self {
        Self { structure, mode }
    }

    pub fn load_funds<R: Read>(&mut self, reader: R) -> Result<UploadOutcome<LoadSummary>> {
        let records = match read_records(reader, &FUND_HEADER) {
            Ok(records) => records,
            Err(err) => return settle(self.mode, "Fund upload", err),
        };
        let mut summary = LoadSummary::default();
        for record in &records {
            let code = column(record, 0);
            let result = Fund::new(code, column(record, 1), column(record, 2))
                .and_then(|fund| self.structure.add_fund(fund).map(|_| ()));
            summary.record(&format!("fund {}", code), result);
        }
        info!("Fund upload: {} saved, {} skipped", summary.saved, summary.skipped.len());
        Ok(UploadOutcome::Completed(summary))
    }

    pub fn load_sources<R: Read>(&mut self, reader: R) -> Result<UploadOutcome<LoadSummary>> {
        let records = match read_records(reader, &SOURCE_HEADER) {
            Ok(records) => records,
            Err(err) => return settle(self.mode, "Source upload", err),
        };
        let mut summary = LoadSummary::default();
        for record in &records {
            let name = column(record, 0);
            let result = self.structure.add_source(name).map(|_| ());
            summary.record(&format!("source {}", name), result);
        }
        info!("Source upload: {} saved, {} skipped", summary.saved, summary.skipped.len());
        Ok(UploadOutcome::Completed(summary))
    }

    /// Parents must appear before their children in the file.
    pub fn load_fund_centers<R: Read>(&mut self, reader: R) -> Result<UploadOutcome<LoadSummary>> {
        let records = match read_records(reader, &FUND_CENTER_HEADER) {
            Ok(records) => records,
            Err(err) => return settle(self.mode, "Fund Centers upload", err),
        };
        let mut summary = LoadSummary::default();
        for record in &records {
            let code = column(record, 1);
            let new = NewFundCenter {
                fundcenter: code.to_string(),
                shortname: optional(column(record, 2)),
                parent: optional(column(record, 0)),
            };
            let result = self.structure.add_fund_center(new).map(|_| ());
            summary.record(&format!("fund center {}", code), result);
        }
        info!("Fund Centers upload: {} saved, {} skipped", summary.saved, summary.skipped.len());
        Ok(UploadOutcome::Completed(summary))
    }

    pub fn load_cost_centers<R: Read>(&mut self, reader: R) -> Result<UploadOutcome<LoadSummary>> {
        let records = match read_records(reader, &COST_CENTER_HEADER) {
            Ok(records) => records,
            Err(err) => return settle(self.mode, "Cost Centers upload", err),
        };
        let mut summary = LoadSummary::default();
        for record in &records {
            let code = column(record, 1);
            let result = Self::new_cost_center(record)
                .and_then(|new| self.structure.add_cost_center(new).map(|_| ()));
            summary.record(&format!("cost center {}", code), result);
        }
        info!("Cost Centers upload: {} saved, {} skipped", summary.saved, summary.skipped.len());
        Ok(UploadOutcome::Completed(summary))
    }

    fn new_cost_center(record: &StringRecord) -> Result<NewCostCenter> {
        Ok(NewCostCenter {
            parent: column(record, 0).to_string(),
            costcenter: column(record, 1).to_string(),
            shortname: optional(column(record, 2)),
            isforecastable: parse_flag(column(record, 3))?,
            isupdatable: parse_flag(column(record, 4))?,
            source: column(record, 5).to_string(),
            fund: column(record, 6).to_string(),
            note: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    FundCenter,
    CostCenter,
}

struct AllocationRow {
    node: String,
    fund: String,
    fy: String,
    quarter: String,
    amount: Decimal,
    note: Option<String>,
}

/// Loads a batch of allocations for one fiscal year and quarter. The whole batch
/// is rejected when any row fails a check.
pub struct AllocationLoader<'a> {
    structure: &'a FinancialStructure,
    ledger: &'a mut AllocationLedger,
    period: PeriodContext,
    mode: UploadMode,
}

impl<'a> AllocationLoader<'a> {
    pub fn new(
        structure: &'a FinancialStructure,
        ledger: &'a mut AllocationLedger,
        period: PeriodContext,
        mode: UploadMode,
    ) -> Self {
        Self {
            structure,
            ledger,
            period,
            mode,
        }
    }

    pub fn load_fund_center_allocations<R: Read>(
        &mut self,
        reader: R,
        fy: i32,
        quarter: u8,
    ) -> Result<UploadOutcome<LoadSummary>> {
        self.load(reader, NodeKind::FundCenter, fy, quarter)
    }

    pub fn load_cost_center_allocations<R: Read>(
        &mut self,
        reader: R,
        fy: i32,
        quarter: u8,
    ) -> Result<UploadOutcome<LoadSummary>> {
        self.load(reader, NodeKind::CostCenter, fy, quarter)
    }

    fn load<R: Read>(&mut self, reader: R, kind: NodeKind, fy: i32, quarter: u8) -> Result<UploadOutcome<LoadSummary>> {
        let context = match kind {
            NodeKind::FundCenter => "Fund center allocation upload",
            NodeKind::CostCenter => "Cost center allocation upload",
        };
        let (rows, quarter) = match self.check_batch(reader, kind, fy, quarter) {
            Ok(batch) => batch,
            Err(err) => return settle(self.mode, context, err),
        };

        let mut summary = LoadSummary::default();
        for row in rows {
            let what = format!("allocation {} {}", row.node, row.fund);
            let node = match kind {
                NodeKind::FundCenter => OrgNode::FundCenter(row.node),
                NodeKind::CostCenter => OrgNode::CostCenter(row.node),
            };
            let allocation = Allocation {
                node,
                fund: row.fund,
                fy,
                quarter,
                amount: row.amount,
                note: row.note,
            };
            let result = self
                .ledger
                .allocate(self.structure, &self.period, allocation)
                .map(|_| ());
            summary.record(&what, result);
        }
        info!("{}: {} saved, {} skipped", context, summary.saved, summary.skipped.len());
        Ok(UploadOutcome::Completed(summary))
    }

    fn check_batch<R: Read>(
        &self,
        reader: R,
        kind: NodeKind,
        fy: i32,
        quarter: u8,
    ) -> Result<(Vec<AllocationRow>, Quarter)> {
        let header: &[&str] = match kind {
            NodeKind::FundCenter => &FUND_CENTER_ALLOCATION_HEADER,
            NodeKind::CostCenter => &COST_CENTER_ALLOCATION_HEADER,
        };
        let records = read_records(reader, header)?;
        let requested_quarter = Quarter::new(quarter)?;

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(AllocationRow {
                node: normalize_code(column(record, 0)),
                fund: normalize_code(column(record, 1)),
                fy: column(record, 2).to_string(),
                quarter: column(record, 3).to_string(),
                amount: parse_amount(column(record, 4))?,
                note: optional(column(record, 5)),
            });
        }

        let known_funds = self.structure.fund_codes();
        let missing: BTreeSet<String> = rows
            .iter()
            .filter(|r| !known_funds.contains(&r.fund))
            .map(|r| r.fund.clone())
            .collect();
        if !missing.is_empty() {
            return Err(BftError::MissingFunds(missing.into_iter().collect()));
        }
        info!("Funds check success.");

        let missing: BTreeSet<String> = rows
            .iter()
            .filter(|r| match kind {
                NodeKind::FundCenter => self.structure.fund_center(&r.node).is_none(),
                NodeKind::CostCenter => self.structure.cost_center(&r.node).is_none(),
            })
            .map(|r| r.node.clone())
            .collect();
        if !missing.is_empty() {
            let missing = missing.into_iter().collect();
            return Err(match kind {
                NodeKind::FundCenter => BftError::MissingFundCenters(missing),
                NodeKind::CostCenter => BftError::MissingCostCenters(missing),
            });
        }

        if let Some(row) = rows.iter().find(|r| r.fy.trim().parse::<i32>().ok() != Some(fy)) {
            return Err(BftError::FiscalYearMismatch {
                expected: fy,
                found: row.fy.clone(),
            });
        }
        for row in &rows {
            if Quarter::parse(&row.quarter)? != requested_quarter {
                return Err(BftError::InvalidQuarter(format!(
                    "{} does not match requested quarter {}",
                    row.quarter, quarter
                )));
            }
        }
        if let Some(row) = rows.iter().find(|r| r.amount <= Decimal::ZERO) {
            return Err(BftError::InvalidAllocation(row.amount));
        }
        Ok((rows, requested_quarter))
    }
}
