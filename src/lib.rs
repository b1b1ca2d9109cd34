//! # BFT
//!
//! Budget and forecasting core for a hierarchical financial structure. It keeps
//! funds, sources, fund centers and cost centers in a materialized-path tree and
//! reconciles line-item encumbrances against DRMIS "DND Cost Center Encumbrance
//! Report" exports, period after period.
//!
//! ## Core Concepts
//!
//! - **Sequence**: dotted integer path (`1.2.0.3`) giving each node its place in the
//!   fund center forest. Cost centers hang behind a reserved `0` segment.
//! - **Encumbrance report**: fixed-width, pipe-delimited text file parsed into a
//!   20-column CSV and staged as import rows.
//! - **Reconciliation**: staged rows update or create line items; lines missing from
//!   the report become orphans with their money and forecast zeroed.
//! - **Forecast**: projected spend of a line, always between spent and working plan.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bft::*;
//!
//! let config = BftConfig::from_file("bft.json")?;
//! let mut state = BftState::default();
//! state.structure.add_fund(Fund::new("C113", "National Procurement", "1")?)?;
//! state.structure.add_source("Basement")?;
//! state.structure.add_fund_center(NewFundCenter {
//!     fundcenter: "2184DA".to_string(),
//!     ..Default::default()
//! })?;
//!
//! let outcome = process_encumbrance_report(
//!     &config,
//!     &mut state,
//!     "encumbrance_2184DA.txt",
//!     &UploadScope::FundCenter("2184DA".to_string()),
//!     UploadMode::Command,
//! )?;
//! ```

pub mod allocation;
pub mod config;
pub mod error;
pub mod forecast;
pub mod ingestion;
pub mod lineitems;
pub mod reconcile;
pub mod schema;
pub mod sequence;
pub mod structure;
pub mod upload;
pub mod utils;

pub use allocation::{AllocationFilter, AllocationLedger, AllocationRollup};
pub use config::{BftConfig, PeriodContext};
pub use error::{BftError, Result};
pub use forecast::{clamp_forecast, ForecastEngine};
pub use ingestion::*;
pub use lineitems::LineItemBook;
pub use reconcile::{EncumbranceReconciler, ImportCounts, ReconcileSummary};
pub use schema::*;
pub use sequence::{
    descendant_sequences, direct_descendant_sequences, is_sequence_child_of,
    is_sequence_descendant_of, SequencePath,
};
pub use structure::FinancialStructure;
pub use upload::{
    AllocationLoader, EncumbranceSummary, LineItemUpload, LoadSummary, StructureLoader,
    UploadMode, UploadOutcome, UploadScope,
};
pub use utils::*;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything one BFT instance tracks between uploads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BftState {
    pub structure: FinancialStructure,
    pub allocations: AllocationLedger,
    pub lineitems: LineItemBook,
}

impl BftState {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

pub struct BftProcessor;

impl BftProcessor {
    pub fn process(
        config: &BftConfig,
        state: &mut BftState,
        file_name: impl AsRef<Path>,
        scope: &UploadScope,
        mode: UploadMode,
    ) -> Result<UploadOutcome<EncumbranceSummary>> {
        config.validate()?;

        info!(
            "Processing encumbrance report {} for FY{} period {}",
            file_name.as_ref().display(),
            config.period.fy,
            config.period.period
        );
        debug!(
            "Structure holds {} fund centers and {} cost centers, {} line items on record",
            state.structure.fund_centers().count(),
            state.structure.cost_centers().count(),
            state.lineitems.len()
        );

        let upload = LineItemUpload::new(config, &state.structure, mode);
        upload.run(file_name, scope, &mut state.lineitems)
    }
}

pub fn process_encumbrance_report(
    config: &BftConfig,
    state: &mut BftState,
    file_name: impl AsRef<Path>,
    scope: &UploadScope,
    mode: UploadMode,
) -> Result<UploadOutcome<EncumbranceSummary>> {
    BftProcessor::process(config, state, file_name, scope, mode)
}
