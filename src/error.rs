use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BftError {
    #[error("Invalid sequence number '{0}'")]
    InvalidSequence(String),

    #[error("Parent sequence {0} cannot contain a reserved .0. segment")]
    AmbiguousParent(String),

    #[error("Parent sequence {0} does not exist in family")]
    ParentDoesNotExist(String),

    #[error("No sequence number left after {0}")]
    SequenceExhausted(String),

    #[error("Sequence {0} is already assigned")]
    DuplicateSequence(String),

    #[error("{0} cannot assign itself as parent")]
    SelfParent(String),

    #[error("{child} is not a direct child of fund center {parent}")]
    NotDirectChild { parent: String, child: String },

    #[error("Fund {0} not found")]
    FundNotFound(String),

    #[error("Source {0} not found")]
    SourceNotFound(String),

    #[error("Fund center {0} not found")]
    FundCenterNotFound(String),

    #[error("Cost center {0} not found")]
    CostCenterNotFound(String),

    #[error("Line item {docno}-{lineno} not found")]
    LineItemNotFound { docno: String, lineno: String },

    #[error("Fund {0} already exists")]
    DuplicateFund(String),

    #[error("Source {0} already exists")]
    DuplicateSource(String),

    #[error("Fund center {0} already exists")]
    DuplicateFundCenter(String),

    #[error("Cost center {0} already exists")]
    DuplicateCostCenter(String),

    #[error("Invalid fund code '{0}': must be 4 characters starting with a letter")]
    InvalidFundCode(String),

    #[error("Invalid vote '{0}': must be one of 0, 1, 5")]
    InvalidVote(String),

    #[error("Allocation less than 0 is invalid: {0}")]
    InvalidAllocation(Decimal),

    #[error("Fiscal year {fy} invalid, must be within {first}..{last}")]
    InvalidFiscalYear { fy: i32, first: i32, last: i32 },

    #[error("Quarter {0} invalid. Must be one of 0,1,2,3,4")]
    InvalidQuarter(String),

    #[error("Period {0} invalid. Must be between 1 and 14")]
    InvalidPeriod(u32),

    #[error("Allocation already exists for {node}, fund {fund}, FY {fy} Q{quarter}")]
    DuplicateAllocation {
        node: String,
        fund: String,
        fy: i32,
        quarter: u8,
    },

    #[error("Report {0} is not a DND Cost Center Encumbrance Report")]
    NotDndReport(String),

    #[error("Could not find FY, FC or report layout in header of {0}")]
    MetadataNotFound(String),

    #[error("Failed to find header line in {0}")]
    HeaderLineNotFound(String),

    #[error("Expected {expected} columns, found {found}: {line}")]
    ColumnCount {
        expected: usize,
        found: usize,
        line: String,
    },

    #[error("No data lines found in report {0}")]
    EmptyReport(String),

    #[error("Invalid columns header: expected '{expected}', found '{found}'")]
    InvalidCsvHeader { expected: String, found: String },

    #[error("Failed to convert '{0}' to amount")]
    InvalidAmount(String),

    #[error("Failed to convert '{0}' as date")]
    InvalidDate(String),

    #[error("There are missing funds: {0:?}")]
    MissingFunds(Vec<String>),

    #[error("There are missing cost centers: {0:?}")]
    MissingCostCenters(Vec<String>),

    #[error("There are missing fund centers: {0:?}")]
    MissingFundCenters(Vec<String>),

    #[error("Line {docno}-{lineno} is of type {doctype} and cannot have spent of {spent}")]
    SpentOnNonCommitment {
        docno: String,
        lineno: String,
        doctype: String,
        spent: Decimal,
    },

    #[error("{requested} does not match report found in dataset: {found}")]
    FundCenterMismatch { requested: String, found: String },

    #[error("Report fiscal year {found} does not match current fiscal year {expected}")]
    FiscalYearMismatch { expected: i32, found: String },

    #[error("Cost center {0} is not updatable")]
    CostCenterNotUpdatable(String),

    #[error("Cost center {0} is not forecastable")]
    CostCenterNotForecastable(String),

    #[error("Line {docno}-{lineno} has spent of {spent}, forecast cannot be set to zero")]
    ForecastBelowSpent {
        docno: String,
        lineno: String,
        spent: Decimal,
    },

    #[error("There are more that one cost center in the report: {0:?}")]
    MultipleCostCenters(Vec<String>),

    #[error("Upload rejected: {0}")]
    UploadRejected(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BftError>;
