use crate::error::{BftError, Result};
use crate::sequence::SequencePath;
use crate::utils::{capitalize, normalize_code};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fund codes that bypass the 4-character rule.
pub const FUND_SENTINEL: &str = "----";
pub const VOTES: [&str; 3] = ["0", "1", "5"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fund {
    pub fund: String,
    pub name: String,
    pub vote: String,
    #[serde(default = "default_true")]
    pub download: bool,
}

fn default_true() -> bool {
    true
}

impl Fund {
    pub fn new(fund: &str, name: &str, vote: &str) -> Result<Self> {
        let fund = Self {
            fund: normalize_code(fund),
            name: name.trim().to_string(),
            vote: vote.trim().to_string(),
            download: true,
        };
        fund.validate()?;
        Ok(fund)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fund != FUND_SENTINEL {
            let starts_with_letter = self
                .fund
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic());
            if self.fund.chars().count() != 4 || !starts_with_letter {
                return Err(BftError::InvalidFundCode(self.fund.clone()));
            }
        }
        if !VOTES.contains(&self.vote.as_str()) {
            return Err(BftError::InvalidVote(self.vote.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for Fund {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.fund, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub source: String,
}

impl Source {
    pub fn new(source: &str) -> Self {
        Self {
            source: capitalize(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundCenter {
    pub fundcenter: String,
    pub shortname: Option<String>,
    pub sequence: SequencePath,
    pub level: usize,
    pub parent: Option<String>,
}

impl fmt::Display for FundCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.fundcenter,
            self.shortname.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostCenter {
    pub costcenter: String,
    pub shortname: Option<String>,
    pub fund: String,
    pub source: String,
    pub isforecastable: bool,
    pub isupdatable: bool,
    pub note: Option<String>,
    pub sequence: SequencePath,
    pub level: usize,
    pub parent: String,
}

impl fmt::Display for CostCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.costcenter,
            self.shortname.as_deref().unwrap_or_default()
        )
    }
}

/// Input for creating a fund center. The store assigns sequence and level.
#[derive(Debug, Clone, Default)]
pub struct NewFundCenter {
    pub fundcenter: String,
    pub shortname: Option<String>,
    pub parent: Option<String>,
}

/// Input for creating a cost center. The store assigns sequence and level.
#[derive(Debug, Clone, Default)]
pub struct NewCostCenter {
    pub costcenter: String,
    pub shortname: Option<String>,
    pub fund: String,
    pub source: String,
    pub isforecastable: bool,
    pub isupdatable: bool,
    pub note: Option<String>,
    pub parent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocType {
    #[serde(rename = "CO")]
    Commitment,
    #[serde(rename = "PC")]
    PreCommitment,
    #[serde(rename = "FR")]
    FundReservation,
}

/// Encumbrance types as printed by DRMIS, and the document type each one maps to.
pub const ENCTYPE_DOCTYPE: [(&str, DocType); 8] = [
    ("Purchase Order", DocType::Commitment),
    ("Funds Commitment", DocType::Commitment),
    ("Commitment", DocType::Commitment),
    ("Purchase Requisition", DocType::PreCommitment),
    ("Funds Precommitment", DocType::PreCommitment),
    ("Precommitment", DocType::PreCommitment),
    ("Funds Reservation", DocType::FundReservation),
    ("Reservation", DocType::FundReservation),
];

impl DocType {
    pub fn code(&self) -> &'static str {
        match self {
            DocType::Commitment => "CO",
            DocType::PreCommitment => "PC",
            DocType::FundReservation => "FR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "CO" => Some(DocType::Commitment),
            "PC" => Some(DocType::PreCommitment),
            "FR" => Some(DocType::FundReservation),
            _ => None,
        }
    }

    pub fn from_enctype(enctype: &str) -> Option<Self> {
        let enctype = enctype.trim();
        ENCTYPE_DOCTYPE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(enctype))
            .map(|(_, doctype)| *doctype)
    }

    /// Spending is only legitimate on commitments.
    pub fn allows_spent(&self) -> bool {
        matches!(self, DocType::Commitment)
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LineStatus {
    New,
    Updated,
    #[serde(rename = "old")]
    #[default]
    Old,
    #[serde(rename = "orphan")]
    Orphan,
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LineStatus::New => "New",
            LineStatus::Updated => "Updated",
            LineStatus::Old => "old",
            LineStatus::Orphan => "orphan",
        };
        f.write_str(text)
    }
}

/// Identity of a line item: document number and `lineno:acctassno`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub docno: String,
    pub lineno: String,
}

impl LineKey {
    pub fn new(docno: impl Into<String>, lineno: impl Into<String>) -> Self {
        Self {
            docno: docno.into(),
            lineno: lineno.into(),
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.docno, self.lineno)
    }
}

/// Staging row read from the intermediate encumbrance CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemImport {
    pub docno: String,
    pub lineno: String,
    pub spent: Decimal,
    pub balance: Decimal,
    pub workingplan: Decimal,
    pub fundcenter: String,
    pub fund: String,
    pub costcenter: String,
    pub internalorder: String,
    pub doctype: String,
    pub enctype: String,
    pub linetext: String,
    pub predecessordocno: String,
    pub predecessorlineno: String,
    pub reference: String,
    pub gl: String,
    pub duedate: Option<NaiveDate>,
    pub vendor: String,
    pub createdby: String,
}

impl LineItemImport {
    pub fn key(&self) -> LineKey {
        LineKey::new(self.docno.clone(), self.lineno.clone())
    }

    /// Document type from the encumbrance type, falling back on the report column.
    pub fn effective_doctype(&self) -> Option<DocType> {
        DocType::from_enctype(&self.enctype).or_else(|| DocType::from_code(&self.doctype))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub docno: String,
    pub lineno: String,
    pub spent: Decimal,
    pub balance: Decimal,
    pub workingplan: Decimal,
    pub fundcenter: String,
    pub fund: String,
    pub costcenter: String,
    pub internalorder: String,
    pub doctype: Option<DocType>,
    pub enctype: String,
    pub linetext: String,
    pub predecessordocno: String,
    pub predecessorlineno: String,
    pub reference: String,
    pub gl: String,
    pub duedate: Option<NaiveDate>,
    pub vendor: String,
    pub createdby: String,
    pub status: LineStatus,
    pub fcintegrity: bool,
}

impl LineItem {
    pub fn key(&self) -> LineKey {
        LineKey::new(self.docno.clone(), self.lineno.clone())
    }

    /// Fresh line item copied from an import row, status forced to `New`.
    pub fn from_import(row: &LineItemImport, costcenter: &str) -> Self {
        Self {
            docno: row.docno.clone(),
            lineno: row.lineno.clone(),
            spent: row.spent,
            balance: row.balance,
            workingplan: row.workingplan,
            fundcenter: row.fundcenter.clone(),
            fund: row.fund.clone(),
            costcenter: costcenter.to_string(),
            internalorder: row.internalorder.clone(),
            doctype: DocType::from_code(&row.doctype),
            enctype: row.enctype.clone(),
            linetext: row.linetext.clone(),
            predecessordocno: row.predecessordocno.clone(),
            predecessorlineno: row.predecessorlineno.clone(),
            reference: row.reference.clone(),
            gl: row.gl.clone(),
            duedate: row.duedate,
            vendor: row.vendor.clone(),
            createdby: row.createdby.clone(),
            status: LineStatus::New,
            fcintegrity: false,
        }
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.enctype, self.docno, self.lineno)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineForecast {
    pub docno: String,
    pub lineno: String,
    pub forecastamount: Decimal,
    /// Snapshot taken when the line was first seen; never changed afterward.
    pub spent_initial: Decimal,
    pub balance_initial: Decimal,
    pub workingplan_initial: Decimal,
    pub description: Option<String>,
    pub comment: Option<String>,
    pub deliverydate: Option<NaiveDate>,
    pub delivered: bool,
}

impl LineForecast {
    pub fn key(&self) -> LineKey {
        LineKey::new(self.docno.clone(), self.lineno.clone())
    }

    pub fn history_record(item: &LineItem) -> Self {
        Self {
            docno: item.docno.clone(),
            lineno: item.lineno.clone(),
            forecastamount: item.spent,
            spent_initial: item.spent,
            balance_initial: item.balance,
            workingplan_initial: item.workingplan,
            description: None,
            comment: None,
            deliverydate: None,
            delivered: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8")]
pub struct Quarter(u8);

impl Quarter {
    pub const KEYS: [u8; 5] = [0, 1, 2, 3, 4];

    pub fn new(quarter: u8) -> Result<Self> {
        if !Self::KEYS.contains(&quarter) {
            return Err(BftError::InvalidQuarter(quarter.to_string()));
        }
        Ok(Self(quarter))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let quarter = raw
            .trim()
            .parse::<u8>()
            .map_err(|_| BftError::InvalidQuarter(raw.to_string()))?;
        Self::new(quarter)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Quarter {
    type Error = BftError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// The node an allocation is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrgNode {
    FundCenter(String),
    CostCenter(String),
}

impl OrgNode {
    pub fn code(&self) -> &str {
        match self {
            OrgNode::FundCenter(code) | OrgNode::CostCenter(code) => code,
        }
    }
}

impl fmt::Display for OrgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub node: OrgNode,
    pub fund: String,
    pub fy: i32,
    pub quarter: Quarter,
    pub amount: Decimal,
    pub note: Option<String>,
}
