use crate::error::{BftError, Result};
use crate::utils::{fiscal_year_window, quarter_for_period, validate_fiscal_year};
use chrono::Datelike;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current fiscal year and period the system is operating in.
///
/// Passed explicitly to every operation that depends on the calendar instead of
/// being read from a shared status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PeriodContext {
    #[schemars(description = "Current fiscal year, e.g. 2024")]
    pub fy: i32,

    #[schemars(description = "Current accounting period, 1 to 14. Periods 13 and 14 are year-end adjustments.")]
    pub period: u32,

    #[serde(default = "default_window")]
    #[schemars(description = "Number of fiscal years accepted on each side of the current one")]
    pub fiscal_year_window: i32,
}

fn default_window() -> i32 {
    4
}

impl PeriodContext {
    pub fn new(fy: i32, period: u32) -> Result<Self> {
        let context = Self {
            fy,
            period,
            fiscal_year_window: default_window(),
        };
        context.validate()?;
        Ok(context)
    }

    /// Context for the current calendar year, period 1.
    pub fn current() -> Self {
        Self {
            fy: chrono::Local::now().year(),
            period: 1,
            fiscal_year_window: default_window(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        quarter_for_period(self.period)?;
        if self.fiscal_year_window < 1 {
            return Err(BftError::InvalidConfig(format!(
                "fiscal_year_window must be positive, got {}",
                self.fiscal_year_window
            )));
        }
        Ok(())
    }

    pub fn quarter(&self) -> Result<u8> {
        quarter_for_period(self.period)
    }

    pub fn fiscal_years(&self) -> std::ops::Range<i32> {
        fiscal_year_window(self.fy, self.fiscal_year_window)
    }

    pub fn check_fiscal_year(&self, fy: i32) -> Result<()> {
        validate_fiscal_year(fy, &self.fiscal_years())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BftConfig {
    #[schemars(description = "Directory where uploaded DRMIS reports are stored and the intermediate CSV is written")]
    pub drmis_dir: PathBuf,

    #[serde(default = "default_csv_file_name")]
    #[schemars(description = "File name of the intermediate encumbrance CSV, relative to drmis_dir")]
    pub csv_file_name: String,

    #[schemars(description = "Fiscal year and period the system operates in")]
    pub period: PeriodContext,
}

fn default_csv_file_name() -> String {
    "encumbrance.csv".to_string()
}

impl BftConfig {
    pub fn new(drmis_dir: impl Into<PathBuf>, period: PeriodContext) -> Self {
        Self {
            drmis_dir: drmis_dir.into(),
            csv_file_name: default_csv_file_name(),
            period,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BftConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.csv_file_name.trim().is_empty() {
            return Err(BftError::InvalidConfig(
                "csv_file_name cannot be empty".to_string(),
            ));
        }
        self.period.validate()
    }

    pub fn csv_path(&self) -> PathBuf {
        self.drmis_dir.join(&self.csv_file_name)
    }

    /// Resolves an uploaded report name against `drmis_dir`.
    pub fn report_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.drmis_dir.join(file_name)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = schemars::schema_for!(BftConfig);
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config = BftConfig::from_json_str(
            r#"{"drmis_dir": "/tmp/drmis", "period": {"fy": 2024, "period": 5}}"#,
        )
        .unwrap();

        assert_eq!(config.csv_file_name, "encumbrance.csv");
        assert_eq!(config.period.fiscal_year_window, 4);
        assert_eq!(config.period.quarter().unwrap(), 2);
        assert_eq!(config.csv_path(), PathBuf::from("/tmp/drmis/encumbrance.csv"));
    }

    #[test]
    fn test_config_rejects_bad_period() {
        let result = BftConfig::from_json_str(
            r#"{"drmis_dir": "/tmp", "period": {"fy": 2024, "period": 15}}"#,
        );
        assert!(matches!(result, Err(BftError::InvalidPeriod(15))));
    }

    #[test]
    fn test_schema_generation() {
        let schema = BftConfig::schema_as_json().unwrap();
        assert!(schema.contains("drmis_dir"));
        assert!(schema.contains("fiscal_year_window"));
    }

    #[test]
    fn test_period_context_window() {
        let period = PeriodContext::new(2024, 1).unwrap();
        assert!(period.check_fiscal_year(2020).is_ok());
        assert!(period.check_fiscal_year(2028).is_err());
    }
}
