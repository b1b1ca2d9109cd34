use crate::error::{BftError, Result};
use crate::schema::{LineForecast, LineItem, LineItemImport, LineKey, LineStatus};
use crate::utils::normalize_code;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Authoritative line items, the staging rows of the latest import and the
/// forecast attached to each line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "BookRecords", into = "BookRecords")]
pub struct LineItemBook {
    items: BTreeMap<LineKey, LineItem>,
    imports: Vec<LineItemImport>,
    forecasts: BTreeMap<LineKey, LineForecast>,
}

/// Serialized form of the book. Keys are rebuilt from the records on load.
#[derive(Serialize, Deserialize)]
struct BookRecords {
    items: Vec<LineItem>,
    imports: Vec<LineItemImport>,
    forecasts: Vec<LineForecast>,
}

impl From<BookRecords> for LineItemBook {
    fn from(records: BookRecords) -> Self {
        Self {
            items: records.items.into_iter().map(|i| (i.key(), i)).collect(),
            imports: records.imports,
            forecasts: records.forecasts.into_iter().map(|f| (f.key(), f)).collect(),
        }
    }
}

impl From<LineItemBook> for BookRecords {
    fn from(book: LineItemBook) -> Self {
        Self {
            items: book.items.into_values().collect(),
            imports: book.imports,
            forecasts: book.forecasts.into_values().collect(),
        }
    }
}

impl LineItemBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncates the staging table and loads `rows` in its place.
    pub fn replace_imports(&mut self, rows: Vec<LineItemImport>) {
        debug!(
            "Replacing {} staged import rows with {}",
            self.imports.len(),
            rows.len()
        );
        self.imports = rows;
    }

    pub fn imports(&self) -> &[LineItemImport] {
        &self.imports
    }

    pub fn import_keys(&self) -> BTreeSet<LineKey> {
        self.imports.iter().map(LineItemImport::key).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &LineKey) -> Option<&LineItem> {
        self.items.get(key)
    }

    pub fn get_mut(&mut self, key: &LineKey) -> Option<&mut LineItem> {
        self.items.get_mut(key)
    }

    pub fn require(&self, key: &LineKey) -> Result<&LineItem> {
        self.items.get(key).ok_or_else(|| BftError::LineItemNotFound {
            docno: key.docno.clone(),
            lineno: key.lineno.clone(),
        })
    }

    pub fn insert(&mut self, item: LineItem) -> Option<LineItem> {
        self.items.insert(item.key(), item)
    }

    pub fn items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.values()
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut LineItem> {
        self.items.values_mut()
    }

    pub fn keys(&self) -> BTreeSet<LineKey> {
        self.items.keys().cloned().collect()
    }

    pub fn by_cost_center(&self, costcenter: &str) -> Vec<&LineItem> {
        let costcenter = normalize_code(costcenter);
        self.items
            .values()
            .filter(|item| item.costcenter == costcenter)
            .collect()
    }

    pub fn by_docno(&self, docno: &str) -> Vec<&LineItem> {
        let docno = docno.trim();
        self.items
            .values()
            .filter(|item| item.docno == docno)
            .collect()
    }

    pub fn with_status(&self, status: LineStatus) -> Vec<&LineItem> {
        self.items
            .values()
            .filter(|item| item.status == status)
            .collect()
    }

    pub fn forecast(&self, key: &LineKey) -> Option<&LineForecast> {
        self.forecasts.get(key)
    }

    pub fn forecast_mut(&mut self, key: &LineKey) -> Option<&mut LineForecast> {
        self.forecasts.get_mut(key)
    }

    pub fn has_forecast(&self, key: &LineKey) -> bool {
        self.forecasts.contains_key(key)
    }

    pub fn insert_forecast(&mut self, forecast: LineForecast) -> Option<LineForecast> {
        self.forecasts.insert(forecast.key(), forecast)
    }

    pub fn forecasts(&self) -> impl Iterator<Item = &LineForecast> {
        self.forecasts.values()
    }

    /// Line item and its forecast, when both exist.
    pub fn line_and_forecast_mut(&mut self, key: &LineKey) -> Option<(&LineItem, &mut LineForecast)> {
        let item = self.items.get(key)?;
        let forecast = self.forecasts.get_mut(key)?;
        Some((item, forecast))
    }
}
