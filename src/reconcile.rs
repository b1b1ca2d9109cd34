//! Merges the staged import rows into the authoritative line items.

use crate::lineitems::LineItemBook;
use crate::schema::{DocType, LineItem, LineItemImport, LineKey, LineStatus};
use crate::structure::FinancialStructure;
use crate::utils::normalize_code;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub marked_old: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped_not_updatable: usize,
    pub skipped_missing_cost_center: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub imports: ImportCounts,
    pub orphans: usize,
    pub fcintegrity_ok: usize,
    pub fcintegrity_failed: usize,
    pub doctype_assigned: usize,
}

pub struct EncumbranceReconciler<'a> {
    structure: &'a FinancialStructure,
}

impl<'a> EncumbranceReconciler<'a> {
    pub fn new(structure: &'a FinancialStructure) -> Self {
        Self { structure }
    }

    pub fn mark_all_old(&self, book: &mut LineItemBook) -> usize {
        let mut count = 0;
        for item in book.items_mut() {
            item.status = LineStatus::Old;
            count += 1;
        }
        count
    }

    /// Creates a line item from an import row. Returns `None`, writing nothing,
    /// when the row's cost center is unknown.
    pub fn insert_line_item(&self, book: &mut LineItemBook, row: &LineItemImport) -> Option<LineKey> {
        let Some(cost_center) = self.structure.cost_center(&row.costcenter) else {
            warn!(
                "Line {}-{} not inserted, cost center {} not found",
                row.docno, row.lineno, row.costcenter
            );
            return None;
        };
        let item = LineItem::from_import(row, &cost_center.costcenter);
        let key = item.key();
        book.insert(item);
        Some(key)
    }

    /// Refreshes the mutable fields of an existing line item. Returns `None`, leaving
    /// the line untouched, when the line or the row's cost center is unknown.
    pub fn update_line_item(&self, book: &mut LineItemBook, row: &LineItemImport) -> Option<LineKey> {
        let Some(cost_center) = self.structure.cost_center(&row.costcenter) else {
            warn!(
                "Line {}-{} not updated, cost center {} not found",
                row.docno, row.lineno, row.costcenter
            );
            return None;
        };
        let key = row.key();
        let item = book.get_mut(&key)?;
        item.costcenter = cost_center.costcenter.clone();
        item.fundcenter = row.fundcenter.clone();
        item.spent = row.spent;
        item.workingplan = row.workingplan;
        item.balance = row.balance;
        item.fund = row.fund.clone();
        item.status = LineStatus::Updated;
        Some(key)
    }

    /// Marks every line old, then updates or inserts one line per staged row.
    /// Rows of cost centers flagged not updatable are left alone.
    pub fn import_lines(&self, book: &mut LineItemBook) -> ImportCounts {
        let mut counts = ImportCounts {
            marked_old: self.mark_all_old(book),
            ..Default::default()
        };
        let not_updatable = self.structure.not_updatable_cost_centers();
        let rows = book.imports().to_vec();

        for row in &rows {
            if not_updatable.contains(&row.costcenter) {
                counts.skipped_not_updatable += 1;
                continue;
            }
            if book.get(&row.key()).is_some() {
                if self.update_line_item(book, row).is_some() {
                    counts.updated += 1;
                }
            } else if self.insert_line_item(book, row).is_some() {
                counts.inserted += 1;
            } else {
                counts.skipped_missing_cost_center += 1;
            }
        }
        info!(
            "Import lines: {} inserted, {} updated, {} not updatable, {} missing cost center",
            counts.inserted,
            counts.updated,
            counts.skipped_not_updatable,
            counts.skipped_missing_cost_center
        );
        counts
    }

    /// Lines known to the book but absent from the staged import, optionally
    /// limited to one cost center.
    pub fn get_orphan_lines(&self, book: &LineItemBook, costcenter: Option<&str>) -> BTreeSet<LineKey> {
        let imported = book.import_keys();
        let existing: BTreeSet<LineKey> = match costcenter {
            Some(cc) => book.by_cost_center(cc).into_iter().map(LineItem::key).collect(),
            None => book.keys(),
        };
        existing.difference(&imported).cloned().collect()
    }

    /// Zeroes money on orphan lines and their forecasts.
    pub fn mark_orphan_lines(&self, book: &mut LineItemBook, orphans: &BTreeSet<LineKey>) -> usize {
        let mut count = 0;
        for key in orphans {
            let Some(item) = book.get_mut(key) else {
                continue;
            };
            item.spent = Decimal::ZERO;
            item.workingplan = Decimal::ZERO;
            item.balance = Decimal::ZERO;
            item.status = LineStatus::Orphan;
            if let Some(forecast) = book.forecast_mut(key) {
                forecast.forecastamount = Decimal::ZERO;
            }
            debug!("Line {} marked orphan", key);
            count += 1;
        }
        if count > 0 {
            info!("{} orphan lines", count);
        }
        count
    }

    /// Flags lines whose (cost center, fund center) pair matches the structure.
    /// Returns the number of lines flagged valid.
    pub fn set_fund_center_integrity(&self, book: &mut LineItemBook) -> usize {
        let pairs = self.structure.valid_pairs();
        for item in book.items_mut() {
            item.fcintegrity = false;
        }
        let mut valid = 0;
        for item in book.items_mut() {
            let pair = (item.costcenter.clone(), normalize_code(&item.fundcenter));
            if pairs.contains(&pair) {
                item.fcintegrity = true;
                valid += 1;
            }
        }
        valid
    }

    pub fn set_doctype(&self, book: &mut LineItemBook) -> usize {
        let mut count = 0;
        for item in book.items_mut() {
            if let Some(doctype) = DocType::from_enctype(&item.enctype) {
                item.doctype = Some(doctype);
                count += 1;
            }
        }
        count
    }

    /// Runs the whole merge in order: import, orphans, integrity, doctype.
    pub fn reconcile(&self, book: &mut LineItemBook, costcenter: Option<&str>) -> ReconcileSummary {
        let imports = self.import_lines(book);
        let orphans = self.get_orphan_lines(book, costcenter);
        let orphans = self.mark_orphan_lines(book, &orphans);
        let fcintegrity_ok = self.set_fund_center_integrity(book);
        let doctype_assigned = self.set_doctype(book);
        let summary = ReconcileSummary {
            imports,
            orphans,
            fcintegrity_ok,
            fcintegrity_failed: book.len() - fcintegrity_ok,
            doctype_assigned,
        };
        if summary.fcintegrity_failed > 0 {
            warn!(
                "{} lines have a fund center that does not match the structure",
                summary.fcintegrity_failed
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Fund, LineForecast, NewCostCenter, NewFundCenter};

    fn structure() -> FinancialStructure {
        let mut s = FinancialStructure::new();
        s.add_fund(Fund::new("C113", "National Procurement", "1").unwrap())
            .unwrap();
        s.add_source("Basement").unwrap();
        s.add_fund_center(NewFundCenter {
            fundcenter: "2184DA".to_string(),
            shortname: None,
            parent: None,
        })
        .unwrap();
        s.add_fund_center(NewFundCenter {
            fundcenter: "2184A3".to_string(),
            shortname: None,
            parent: Some("2184DA".to_string()),
        })
        .unwrap();
        for (code, updatable) in [("8484WA", true), ("8484XA", false)] {
            s.add_cost_center(NewCostCenter {
                costcenter: code.to_string(),
                fund: "C113".to_string(),
                source: "Basement".to_string(),
                isforecastable: true,
                isupdatable: updatable,
                parent: "2184A3".to_string(),
                ..Default::default()
            })
            .unwrap();
        }
        s
    }

    fn row(docno: &str, lineno: &str, cc: &str, spent: i64, wp: i64) -> LineItemImport {
        LineItemImport {
            docno: docno.to_string(),
            lineno: lineno.to_string(),
            spent: Decimal::from(spent),
            balance: Decimal::from(wp - spent),
            workingplan: Decimal::from(wp),
            fundcenter: "2184A3".to_string(),
            fund: "C113".to_string(),
            costcenter: cc.to_string(),
            internalorder: String::new(),
            doctype: String::new(),
            enctype: "Purchase Order".to_string(),
            linetext: String::new(),
            predecessordocno: String::new(),
            predecessorlineno: String::new(),
            reference: String::new(),
            gl: "52149".to_string(),
            duedate: None,
            vendor: String::new(),
            createdby: String::new(),
        }
    }

    #[test]
    fn test_import_inserts_then_updates() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();

        book.replace_imports(vec![row("100", "1:0", "8484WA", 10, 100)]);
        let counts = reconciler.import_lines(&mut book);
        assert_eq!(counts.inserted, 1);
        assert_eq!(book.get(&LineKey::new("100", "1:0")).unwrap().status, LineStatus::New);

        book.replace_imports(vec![row("100", "1:0", "8484WA", 50, 200)]);
        let counts = reconciler.import_lines(&mut book);
        assert_eq!(counts.marked_old, 1);
        assert_eq!(counts.updated, 1);
        let item = book.get(&LineKey::new("100", "1:0")).unwrap();
        assert_eq!(item.status, LineStatus::Updated);
        assert_eq!(item.spent, Decimal::from(50));
        assert_eq!(item.workingplan, Decimal::from(200));
    }

    #[test]
    fn test_update_with_unknown_cost_center_leaves_line_untouched() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();
        book.insert(LineItem::from_import(&row("100", "1:0", "8484WA", 10, 100), "8484WA"));

        let result = reconciler.update_line_item(&mut book, &row("100", "1:0", "ZZZZZZ", 99, 999));
        assert!(result.is_none());
        let item = book.get(&LineKey::new("100", "1:0")).unwrap();
        assert_eq!(item.spent, Decimal::from(10));
        assert_eq!(item.costcenter, "8484WA");
        assert_eq!(item.status, LineStatus::New);
    }

    #[test]
    fn test_insert_with_unknown_cost_center_skips_row_and_continues() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();
        book.replace_imports(vec![
            row("100", "1:0", "ZZZZZZ", 0, 100),
            row("100", "2:0", "8484WA", 0, 100),
        ]);

        let counts = reconciler.import_lines(&mut book);
        assert_eq!(counts.skipped_missing_cost_center, 1);
        assert_eq!(counts.inserted, 1);
        assert!(book.get(&LineKey::new("100", "1:0")).is_none());
        assert!(book.get(&LineKey::new("100", "2:0")).is_some());
    }

    #[test]
    fn test_not_updatable_cost_center_is_skipped() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();
        book.replace_imports(vec![row("200", "1:0", "8484XA", 0, 100)]);

        let counts = reconciler.import_lines(&mut book);
        assert_eq!(counts.skipped_not_updatable, 1);
        assert!(book.is_empty());
    }

    #[test]
    fn test_orphan_lines_are_zeroed_with_their_forecast() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();
        let orphan = LineItem::from_import(&row("999999", "123", "8484WA", 50, 500), "8484WA");
        book.insert_forecast(LineForecast::history_record(&orphan));
        book.forecast_mut(&orphan.key()).unwrap().forecastamount = Decimal::from(300);
        book.insert(orphan);

        book.replace_imports(vec![row("100", "1:0", "8484WA", 0, 100)]);
        let summary = reconciler.reconcile(&mut book, None);
        assert_eq!(summary.orphans, 1);

        let key = LineKey::new("999999", "123");
        let item = book.get(&key).unwrap();
        assert_eq!(item.spent, Decimal::ZERO);
        assert_eq!(item.workingplan, Decimal::ZERO);
        assert_eq!(item.balance, Decimal::ZERO);
        assert_eq!(item.status, LineStatus::Orphan);
        assert_eq!(book.forecast(&key).unwrap().forecastamount, Decimal::ZERO);
    }

    #[test]
    fn test_orphan_lines_scoped_to_cost_center() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();
        book.insert(LineItem::from_import(&row("1", "1:0", "8484WA", 0, 10), "8484WA"));
        book.insert(LineItem::from_import(&row("2", "1:0", "8484XA", 0, 10), "8484XA"));
        book.replace_imports(Vec::new());

        assert_eq!(reconciler.get_orphan_lines(&book, None).len(), 2);
        let scoped = reconciler.get_orphan_lines(&book, Some("8484wa"));
        assert_eq!(scoped.len(), 1);
        assert!(scoped.contains(&LineKey::new("1", "1:0")));
    }

    #[test]
    fn test_fund_center_integrity_is_idempotent() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();
        book.insert(LineItem::from_import(&row("1", "1:0", "8484WA", 0, 10), "8484WA"));
        let mut drifted = row("2", "1:0", "8484WA", 0, 10);
        drifted.fundcenter = "2184DA".to_string();
        book.insert(LineItem::from_import(&drifted, "8484WA"));

        let first = reconciler.set_fund_center_integrity(&mut book);
        let flags: Vec<bool> = book.items().map(|i| i.fcintegrity).collect();
        let second = reconciler.set_fund_center_integrity(&mut book);
        let again: Vec<bool> = book.items().map(|i| i.fcintegrity).collect();

        assert_eq!(first, 1);
        assert_eq!(first, second);
        assert_eq!(flags, again);
        assert!(!book.get(&LineKey::new("2", "1:0")).unwrap().fcintegrity);
    }

    #[test]
    fn test_set_doctype_from_enctype() {
        let s = structure();
        let reconciler = EncumbranceReconciler::new(&s);
        let mut book = LineItemBook::new();
        let mut reservation = row("3", "1:0", "8484WA", 0, 10);
        reservation.enctype = "Funds Reservation".to_string();
        book.insert(LineItem::from_import(&reservation, "8484WA"));
        book.insert(LineItem::from_import(&row("4", "1:0", "8484WA", 0, 10), "8484WA"));

        assert_eq!(reconciler.set_doctype(&mut book), 2);
        assert_eq!(
            book.get(&LineKey::new("3", "1:0")).unwrap().doctype,
            Some(DocType::FundReservation)
        );
        assert_eq!(
            book.get(&LineKey::new("4", "1:0")).unwrap().doctype,
            Some(DocType::Commitment)
        );
    }
}
