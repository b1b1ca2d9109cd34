//! Line forecasts: bounds enforcement, bulk corrections and proportional
//! distribution of a target amount over a document or a cost center.

use crate::error::{BftError, Result};
use crate::lineitems::LineItemBook;
use crate::schema::{LineForecast, LineItem, LineKey, LineStatus};
use crate::structure::FinancialStructure;
use crate::utils::normalize_code;
use log::{debug, info, warn};
use rust_decimal::Decimal;

/// Forecast bounded by `[spent, workingplan]`. Spent wins when it exceeds the
/// working plan.
pub fn clamp_forecast(item: &LineItem, amount: Decimal) -> Decimal {
    amount.min(item.workingplan).max(item.spent)
}

/// Splits `total` by working plan, rounded to cents. The last share absorbs the
/// rounding remainder so the shares add up to `total`.
fn proportional_shares(total: Decimal, lines: &[&LineItem], workingplan_total: Decimal) -> Vec<Decimal> {
    let mut shares: Vec<Decimal> = lines
        .iter()
        .map(|item| (total * item.workingplan / workingplan_total).round_dp(2))
        .collect();
    if let Some(last) = shares.len().checked_sub(1) {
        let others: Decimal = shares[..last].iter().sum();
        shares[last] = total.round_dp(2) - others;
    }
    shares
}

pub struct ForecastEngine<'a> {
    structure: &'a FinancialStructure,
}

impl<'a> ForecastEngine<'a> {
    pub fn new(structure: &'a FinancialStructure) -> Self {
        Self { structure }
    }

    fn matches_cost_center(item: &LineItem, costcenter: Option<&str>) -> bool {
        costcenter.map_or(true, |cc| item.costcenter == normalize_code(cc))
    }

    fn is_forecastable(&self, item: &LineItem) -> bool {
        self.structure
            .cost_center(&item.costcenter)
            .is_some_and(|cc| cc.isforecastable)
    }

    /// Saves a forecast for one line and returns the amount actually stored.
    ///
    /// Lines of a non-forecastable cost center keep their existing forecast.
    pub fn save_forecast(&self, book: &mut LineItemBook, key: &LineKey, amount: Decimal) -> Result<Decimal> {
        let item = book.require(key)?.clone();
        let cost_center = self.structure.require_cost_center(&item.costcenter)?;
        if !cost_center.isforecastable {
            return match book.forecast(key) {
                Some(existing) => Ok(existing.forecastamount),
                None => Err(BftError::CostCenterNotForecastable(cost_center.costcenter.clone())),
            };
        }

        let amount = clamp_forecast(&item, amount.round_dp(2));
        match book.forecast_mut(key) {
            Some(forecast) => forecast.forecastamount = amount,
            None => {
                let mut forecast = LineForecast::history_record(&item);
                forecast.forecastamount = amount;
                book.insert_forecast(forecast);
            }
        }
        debug!("Forecast for {} set to {}", key, amount);
        Ok(amount)
    }

    fn forecast_keys(book: &LineItemBook, costcenter: Option<&str>) -> Vec<LineKey> {
        book.forecasts()
            .map(LineForecast::key)
            .filter(|key| {
                book.get(key)
                    .is_some_and(|item| Self::matches_cost_center(item, costcenter))
            })
            .collect()
    }

    /// Raises every forecast below its line's spent up to spent.
    pub fn set_underforecasted(&self, book: &mut LineItemBook, costcenter: Option<&str>) -> usize {
        let mut count = 0;
        for key in Self::forecast_keys(book, costcenter) {
            if let Some((item, forecast)) = book.line_and_forecast_mut(&key) {
                if forecast.forecastamount < item.spent {
                    forecast.forecastamount = item.spent;
                    count += 1;
                }
            }
        }
        info!("{} underforecasted lines set to spent", count);
        count
    }

    /// Lowers every forecast above its line's working plan down to the working plan.
    pub fn set_overforecasted(&self, book: &mut LineItemBook, costcenter: Option<&str>) -> usize {
        let mut count = 0;
        for key in Self::forecast_keys(book, costcenter) {
            if let Some((item, forecast)) = book.line_and_forecast_mut(&key) {
                if forecast.forecastamount > item.workingplan {
                    forecast.forecastamount = item.workingplan;
                    count += 1;
                }
            }
        }
        info!("{} overforecasted lines set to working plan", count);
        count
    }

    /// Creates the history record of every new line in a forecastable cost center.
    pub fn set_encumbrance_history_record(&self, book: &mut LineItemBook, costcenter: Option<&str>) -> usize {
        let candidates: Vec<LineItem> = book
            .with_status(LineStatus::New)
            .into_iter()
            .filter(|item| Self::matches_cost_center(item, costcenter))
            .cloned()
            .collect();

        let mut processed = 0;
        for item in &candidates {
            if !self.is_forecastable(item) {
                continue;
            }
            if !book.has_forecast(&item.key()) {
                book.insert_forecast(LineForecast::history_record(item));
            }
            processed += 1;
        }

        if processed < candidates.len() {
            warn!(
                "{} new lines found but only {} history records processed",
                candidates.len(),
                processed
            );
        } else {
            info!("{} encumbrance history records processed", processed);
        }
        processed
    }

    /// Spreads `target` over the lines of one document.
    pub fn forecast_line_by_docno(&self, book: &mut LineItemBook, docno: &str, target: Decimal) -> Result<Decimal> {
        let keys: Vec<LineKey> = book.by_docno(docno).into_iter().map(LineItem::key).collect();
        self.distribute(book, &keys, target)
    }

    /// Spreads `target` over the lines of one cost center.
    pub fn forecast_costcenter_lines(&self, book: &mut LineItemBook, costcenter: &str, target: Decimal) -> Result<Decimal> {
        let cost_center = self.structure.require_cost_center(costcenter)?;
        if !cost_center.isforecastable {
            return Err(BftError::CostCenterNotForecastable(cost_center.costcenter.clone()));
        }
        let keys: Vec<LineKey> = book
            .by_cost_center(&cost_center.costcenter)
            .into_iter()
            .map(LineItem::key)
            .collect();
        self.distribute(book, &keys, target)
    }

    /// Two passes: lines with spent take `target` in proportion to their working
    /// plan, then unspent lines share what is left in proportion to theirs.
    /// The last line of each pass takes that pass's rounding remainder, so only
    /// clamping can make the applied total differ from `target`.
    /// Returns the total forecast applied.
    fn distribute(&self, book: &mut LineItemBook, keys: &[LineKey], target: Decimal) -> Result<Decimal> {
        let lines: Vec<LineItem> = keys
            .iter()
            .filter_map(|key| book.get(key))
            .filter(|item| self.is_forecastable(item))
            .cloned()
            .collect();
        if lines.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let (spent_lines, unspent_lines): (Vec<&LineItem>, Vec<&LineItem>) =
            lines.iter().partition(|item| item.spent != Decimal::ZERO);

        let mut applied = Decimal::ZERO;
        let spent_wp: Decimal = spent_lines.iter().map(|item| item.workingplan).sum();
        if spent_wp > Decimal::ZERO {
            let shares = proportional_shares(target, &spent_lines, spent_wp);
            for (item, amount) in spent_lines.iter().zip(shares) {
                applied += self.save_forecast(book, &item.key(), amount)?;
            }
        } else {
            for item in &spent_lines {
                applied += self.save_forecast(book, &item.key(), item.spent)?;
            }
        }

        let remaining = target - applied;
        let unspent_wp: Decimal = unspent_lines.iter().map(|item| item.workingplan).sum();
        let shares = if unspent_wp > Decimal::ZERO {
            proportional_shares(remaining, &unspent_lines, unspent_wp)
        } else {
            vec![Decimal::ZERO; unspent_lines.len()]
        };
        for (item, amount) in unspent_lines.iter().zip(shares) {
            applied += self.save_forecast(book, &item.key(), amount)?;
        }

        info!("Forecast of {} distributed over {} lines, {} applied", target, lines.len(), applied);
        Ok(applied.round_dp(2))
    }

    pub fn set_to_working_plan(&self, book: &mut LineItemBook, key: &LineKey) -> Result<Decimal> {
        let workingplan = book.require(key)?.workingplan;
        self.save_forecast(book, key, workingplan)
    }

    /// Zero forecast; refused once anything has been spent on the line.
    pub fn set_to_zero(&self, book: &mut LineItemBook, key: &LineKey) -> Result<Decimal> {
        let item = book.require(key)?;
        if item.spent > Decimal::ZERO {
            return Err(BftError::ForecastBelowSpent {
                docno: item.docno.clone(),
                lineno: item.lineno.clone(),
                spent: item.spent,
            });
        }
        self.save_forecast(book, key, Decimal::ZERO)
    }

    pub fn line_forecast<'b>(&self, book: &'b LineItemBook, key: &LineKey) -> Option<&'b LineForecast> {
        book.forecast(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Fund, LineItemImport, NewCostCenter, NewFundCenter};

    fn structure() -> FinancialStructure {
        let mut s = FinancialStructure::new();
        s.add_fund(Fund::new("C113", "National Procurement", "1").unwrap())
            .unwrap();
        s.add_source("Basement").unwrap();
        s.add_fund_center(NewFundCenter {
            fundcenter: "2184A3".to_string(),
            shortname: None,
            parent: None,
        })
        .unwrap();
        for (code, forecastable) in [("8484WA", true), ("8484XA", false)] {
            s.add_cost_center(NewCostCenter {
                costcenter: code.to_string(),
                fund: "C113".to_string(),
                source: "Basement".to_string(),
                isforecastable: forecastable,
                isupdatable: true,
                parent: "2184A3".to_string(),
                ..Default::default()
            })
            .unwrap();
        }
        s
    }

    fn line(docno: &str, lineno: &str, cc: &str, spent: i64, wp: i64) -> LineItem {
        let row = LineItemImport {
            docno: docno.to_string(),
            lineno: lineno.to_string(),
            spent: Decimal::from(spent),
            balance: Decimal::from(wp - spent),
            workingplan: Decimal::from(wp),
            fundcenter: "2184A3".to_string(),
            fund: "C113".to_string(),
            costcenter: cc.to_string(),
            internalorder: String::new(),
            doctype: "CO".to_string(),
            enctype: "Purchase Order".to_string(),
            linetext: String::new(),
            predecessordocno: String::new(),
            predecessorlineno: String::new(),
            reference: String::new(),
            gl: "52149".to_string(),
            duedate: None,
            vendor: String::new(),
            createdby: String::new(),
        };
        LineItem::from_import(&row, cc)
    }

    fn book_with(lines: Vec<LineItem>) -> LineItemBook {
        let mut book = LineItemBook::new();
        for item in lines {
            book.insert(item);
        }
        book
    }

    #[test]
    fn test_save_forecast_clamps_to_bounds() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let mut book = book_with(vec![line("1", "1:0", "8484WA", 100, 500)]);
        let key = LineKey::new("1", "1:0");

        assert_eq!(engine.save_forecast(&mut book, &key, Decimal::from(50)).unwrap(), Decimal::from(100));
        assert_eq!(engine.save_forecast(&mut book, &key, Decimal::from(900)).unwrap(), Decimal::from(500));
        assert_eq!(engine.save_forecast(&mut book, &key, Decimal::from(100)).unwrap(), Decimal::from(100));
        assert_eq!(engine.save_forecast(&mut book, &key, Decimal::from(500)).unwrap(), Decimal::from(500));
        assert_eq!(engine.save_forecast(&mut book, &key, Decimal::from(250)).unwrap(), Decimal::from(250));
        assert_eq!(book.forecast(&key).unwrap().forecastamount, Decimal::from(250));
    }

    #[test]
    fn test_non_forecastable_keeps_existing_forecast() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let item = line("2", "1:0", "8484XA", 0, 500);
        let mut book = book_with(vec![item.clone()]);
        let key = item.key();

        assert!(matches!(
            engine.save_forecast(&mut book, &key, Decimal::from(100)),
            Err(BftError::CostCenterNotForecastable(_))
        ));

        let mut existing = LineForecast::history_record(&item);
        existing.forecastamount = Decimal::from(42);
        book.insert_forecast(existing);
        assert_eq!(engine.save_forecast(&mut book, &key, Decimal::from(100)).unwrap(), Decimal::from(42));
    }

    #[test]
    fn test_under_and_over_forecasted() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let under = line("1", "1:0", "8484WA", 100, 500);
        let over = line("1", "2:0", "8484WA", 0, 300);
        let mut book = book_with(vec![under.clone(), over.clone()]);

        let mut f = LineForecast::history_record(&under);
        f.forecastamount = Decimal::from(10);
        book.insert_forecast(f);
        let mut f = LineForecast::history_record(&over);
        f.forecastamount = Decimal::from(999);
        book.insert_forecast(f);

        assert_eq!(engine.set_underforecasted(&mut book, Some("8484WA")), 1);
        assert_eq!(engine.set_overforecasted(&mut book, None), 1);
        assert_eq!(book.forecast(&under.key()).unwrap().forecastamount, Decimal::from(100));
        assert_eq!(book.forecast(&over.key()).unwrap().forecastamount, Decimal::from(300));
        assert_eq!(engine.set_underforecasted(&mut book, None), 0);
    }

    #[test]
    fn test_history_record_only_for_new_forecastable_lines() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let mut updated = line("3", "1:0", "8484WA", 0, 10);
        updated.status = LineStatus::Updated;
        let mut book = book_with(vec![
            line("1", "1:0", "8484WA", 40, 400),
            line("2", "1:0", "8484XA", 0, 100),
            updated,
        ]);

        let processed = engine.set_encumbrance_history_record(&mut book, None);
        assert_eq!(processed, 1);
        let record = book.forecast(&LineKey::new("1", "1:0")).unwrap();
        assert_eq!(record.forecastamount, Decimal::from(40));
        assert_eq!(record.spent_initial, Decimal::from(40));
        assert_eq!(record.workingplan_initial, Decimal::from(400));
        assert_eq!(record.balance_initial, Decimal::from(360));
        assert!(book.forecast(&LineKey::new("2", "1:0")).is_none());
        assert!(book.forecast(&LineKey::new("3", "1:0")).is_none());
    }

    #[test]
    fn test_history_snapshot_is_not_changed_by_saves() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let mut book = book_with(vec![line("1", "1:0", "8484WA", 40, 400)]);
        engine.set_encumbrance_history_record(&mut book, None);
        let key = LineKey::new("1", "1:0");
        engine.save_forecast(&mut book, &key, Decimal::from(300)).unwrap();
        let record = book.forecast(&key).unwrap();
        assert_eq!(record.spent_initial, Decimal::from(40));
        assert_eq!(record.forecastamount, Decimal::from(300));
    }

    #[test]
    fn test_forecast_by_docno_fills_spent_lines_first() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let mut book = book_with(vec![
            line("77", "1:0", "8484WA", 100, 400),
            line("77", "2:0", "8484WA", 0, 600),
        ]);

        let applied = engine.forecast_line_by_docno(&mut book, "77", Decimal::from(500)).unwrap();
        assert_eq!(applied, Decimal::from(500));
        assert_eq!(book.forecast(&LineKey::new("77", "1:0")).unwrap().forecastamount, Decimal::from(400));
        assert_eq!(book.forecast(&LineKey::new("77", "2:0")).unwrap().forecastamount, Decimal::from(100));

        let applied = engine.forecast_line_by_docno(&mut book, "77", Decimal::from(200)).unwrap();
        assert_eq!(applied, Decimal::from(200));
        assert_eq!(book.forecast(&LineKey::new("77", "1:0")).unwrap().forecastamount, Decimal::from(200));
        assert_eq!(book.forecast(&LineKey::new("77", "2:0")).unwrap().forecastamount, Decimal::ZERO);
    }

    #[test]
    fn test_forecast_costcenter_lines() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let mut book = book_with(vec![
            line("1", "1:0", "8484WA", 0, 300),
            line("2", "1:0", "8484WA", 0, 100),
        ]);

        let applied = engine.forecast_costcenter_lines(&mut book, "8484wa", Decimal::from(200)).unwrap();
        assert_eq!(applied, Decimal::from(200));
        assert_eq!(book.forecast(&LineKey::new("1", "1:0")).unwrap().forecastamount, Decimal::from(150));
        assert_eq!(book.forecast(&LineKey::new("2", "1:0")).unwrap().forecastamount, Decimal::from(50));

        let mut empty = LineItemBook::new();
        assert_eq!(
            engine.forecast_costcenter_lines(&mut empty, "8484WA", Decimal::from(10)).unwrap(),
            Decimal::ZERO
        );
        assert!(matches!(
            engine.forecast_costcenter_lines(&mut empty, "8484XA", Decimal::from(10)),
            Err(BftError::CostCenterNotForecastable(_))
        ));
    }

    #[test]
    fn test_distribution_keeps_every_cent() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let mut book = book_with(vec![
            line("1", "1:0", "8484WA", 0, 100),
            line("2", "1:0", "8484WA", 0, 100),
            line("3", "1:0", "8484WA", 0, 100),
        ]);

        let applied = engine.forecast_costcenter_lines(&mut book, "8484WA", Decimal::from(100)).unwrap();
        assert_eq!(applied, Decimal::from(100));
        assert_eq!(book.forecast(&LineKey::new("1", "1:0")).unwrap().forecastamount, Decimal::new(3333, 2));
        assert_eq!(book.forecast(&LineKey::new("2", "1:0")).unwrap().forecastamount, Decimal::new(3333, 2));
        assert_eq!(book.forecast(&LineKey::new("3", "1:0")).unwrap().forecastamount, Decimal::new(3334, 2));

        let mut spent = book_with(vec![
            line("7", "1:0", "8484WA", 1, 100),
            line("7", "2:0", "8484WA", 1, 100),
            line("7", "3:0", "8484WA", 1, 100),
        ]);
        let applied = engine.forecast_line_by_docno(&mut spent, "7", Decimal::from(200)).unwrap();
        assert_eq!(applied, Decimal::from(200));
    }

    #[test]
    fn test_set_to_working_plan_and_zero() {
        let s = structure();
        let engine = ForecastEngine::new(&s);
        let mut book = book_with(vec![
            line("1", "1:0", "8484WA", 0, 300),
            line("2", "1:0", "8484WA", 10, 100),
        ]);
        let free = LineKey::new("1", "1:0");
        let spent = LineKey::new("2", "1:0");

        assert_eq!(engine.set_to_working_plan(&mut book, &free).unwrap(), Decimal::from(300));
        assert_eq!(engine.set_to_zero(&mut book, &free).unwrap(), Decimal::ZERO);
        assert!(matches!(
            engine.set_to_zero(&mut book, &spent),
            Err(BftError::ForecastBelowSpent { .. })
        ));
        assert!(engine.line_forecast(&book, &spent).is_none());
    }
}
