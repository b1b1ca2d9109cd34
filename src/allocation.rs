use crate::config::PeriodContext;
use crate::error::{BftError, Result};
use crate::schema::{Allocation, OrgNode, Quarter};
use crate::structure::FinancialStructure;
use crate::utils::normalize_code;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type AllocationKey = (OrgNode, String, i32, Quarter);

/// Query over the ledger. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AllocationFilter {
    pub node: Option<OrgNode>,
    pub fund: Option<String>,
    pub fy: Option<i32>,
    pub quarter: Option<Quarter>,
}

impl AllocationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund_center(mut self, code: &str) -> Self {
        self.node = Some(OrgNode::FundCenter(normalize_code(code)));
        self
    }

    pub fn cost_center(mut self, code: &str) -> Self {
        self.node = Some(OrgNode::CostCenter(normalize_code(code)));
        self
    }

    pub fn fund(mut self, fund: &str) -> Self {
        self.fund = Some(normalize_code(fund));
        self
    }

    pub fn fy(mut self, fy: i32) -> Self {
        self.fy = Some(fy);
        self
    }

    pub fn quarter(mut self, quarter: Quarter) -> Self {
        self.quarter = Some(quarter);
        self
    }

    fn matches(&self, allocation: &Allocation) -> bool {
        self.node.as_ref().map_or(true, |n| n == &allocation.node)
            && self.fund.as_ref().map_or(true, |f| f == &allocation.fund)
            && self.fy.map_or(true, |fy| fy == allocation.fy)
            && self.quarter.map_or(true, |q| q == allocation.quarter)
    }
}

/// Allocation totals below one fund center for a fund, fiscal year and quarter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRollup {
    pub fundcenter: String,
    pub own: Decimal,
    pub fund_centers: Decimal,
    pub cost_centers: Decimal,
}

impl AllocationRollup {
    /// Everything allocated below the fund center, excluding its own allocation.
    pub fn descendants_total(&self) -> Decimal {
        self.fund_centers + self.cost_centers
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationLedger {
    allocations: BTreeMap<String, Allocation>,
}

fn storage_key(key: &AllocationKey) -> String {
    let kind = match &key.0 {
        OrgNode::FundCenter(_) => "FC",
        OrgNode::CostCenter(_) => "CC",
    };
    format!("{}:{}:{}:{}:{}", kind, key.0.code(), key.1, key.2, key.3.value())
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and records a new allocation. Nothing is stored when a check fails.
    pub fn allocate(
        &mut self,
        structure: &FinancialStructure,
        period: &PeriodContext,
        allocation: Allocation,
    ) -> Result<&Allocation> {
        let allocation = self.validate(structure, period, allocation)?;
        let key = storage_key(&(
            allocation.node.clone(),
            allocation.fund.clone(),
            allocation.fy,
            allocation.quarter,
        ));
        if self.allocations.contains_key(&key) {
            return Err(BftError::DuplicateAllocation {
                node: allocation.node.to_string(),
                fund: allocation.fund,
                fy: allocation.fy,
                quarter: allocation.quarter.value(),
            });
        }
        debug!(
            "Allocation {} {} FY{} {} = {}",
            allocation.node, allocation.fund, allocation.fy, allocation.quarter, allocation.amount
        );
        Ok(&*self.allocations.entry(key).or_insert(allocation))
    }

    fn validate(
        &self,
        structure: &FinancialStructure,
        period: &PeriodContext,
        mut allocation: Allocation,
    ) -> Result<Allocation> {
        if allocation.amount < Decimal::ZERO {
            warn!("Rejected negative allocation for {}", allocation.node);
            return Err(BftError::InvalidAllocation(allocation.amount));
        }
        period.check_fiscal_year(allocation.fy)?;

        let fund = structure
            .fund(&allocation.fund)
            .ok_or_else(|| BftError::FundNotFound(allocation.fund.clone()))?;
        allocation.fund = fund.fund.clone();

        allocation.node = match &allocation.node {
            OrgNode::FundCenter(code) => {
                OrgNode::FundCenter(structure.require_fund_center(code)?.fundcenter.clone())
            }
            OrgNode::CostCenter(code) => {
                OrgNode::CostCenter(structure.require_cost_center(code)?.costcenter.clone())
            }
        };
        allocation.amount = allocation.amount.round_dp(2);
        Ok(allocation)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn filter(&self, filter: &AllocationFilter) -> Vec<&Allocation> {
        self.allocations
            .values()
            .filter(|a| filter.matches(a))
            .collect()
    }

    pub fn get(&self, node: &OrgNode, fund: &str, fy: i32, quarter: Quarter) -> Option<&Allocation> {
        let key = storage_key(&(node.clone(), normalize_code(fund), fy, quarter));
        self.allocations.get(&key)
    }

    /// Allocations of every fund center at or below `fundcenter`.
    pub fn descendants_fundcenter(
        &self,
        structure: &FinancialStructure,
        fundcenter: &str,
    ) -> Result<Vec<&Allocation>> {
        let root = structure.require_fund_center(fundcenter)?;
        let mut codes: Vec<String> = structure
            .fund_center_descendants(fundcenter)?
            .into_iter()
            .map(|fc| fc.fundcenter.clone())
            .collect();
        codes.push(root.fundcenter.clone());
        Ok(self
            .allocations
            .values()
            .filter(|a| matches!(&a.node, OrgNode::FundCenter(code) if codes.contains(code)))
            .collect())
    }

    /// Allocations of every cost center below `fundcenter`.
    pub fn descendants_costcenter(
        &self,
        structure: &FinancialStructure,
        fundcenter: &str,
    ) -> Result<Vec<&Allocation>> {
        let codes: Vec<String> = structure
            .cost_center_descendants(fundcenter)?
            .into_iter()
            .map(|cc| cc.costcenter.clone())
            .collect();
        Ok(self
            .allocations
            .values()
            .filter(|a| matches!(&a.node, OrgNode::CostCenter(code) if codes.contains(code)))
            .collect())
    }

    /// Allocations of the direct fund center children of `parent`'s node that share
    /// its fund, fiscal year and quarter.
    pub fn sub_allocations(
        &self,
        structure: &FinancialStructure,
        parent: &Allocation,
    ) -> Result<Vec<&Allocation>> {
        let OrgNode::FundCenter(code) = &parent.node else {
            return Ok(Vec::new());
        };
        let children: Vec<String> = structure
            .child_fund_centers(code)
            .into_iter()
            .map(|fc| fc.fundcenter.clone())
            .collect();
        Ok(self
            .allocations
            .values()
            .filter(|a| {
                matches!(&a.node, OrgNode::FundCenter(c) if children.contains(c))
                    && a.fund == parent.fund
                    && a.fy == parent.fy
                    && a.quarter == parent.quarter
            })
            .collect())
    }

    /// Allocations of the cost centers directly under `fundcenter`.
    pub fn cost_center_sub_allocations(
        &self,
        structure: &FinancialStructure,
        fundcenter: &str,
        fund: &str,
        fy: i32,
        quarter: Quarter,
    ) -> Vec<&Allocation> {
        let fund = normalize_code(fund);
        let children: Vec<String> = structure
            .child_cost_centers(fundcenter)
            .into_iter()
            .map(|cc| cc.costcenter.clone())
            .collect();
        self.allocations
            .values()
            .filter(|a| {
                matches!(&a.node, OrgNode::CostCenter(c) if children.contains(c))
                    && a.fund == fund
                    && a.fy == fy
                    && a.quarter == quarter
            })
            .collect()
    }

    /// Totals below `fundcenter` for one fund, fiscal year and quarter.
    pub fn rollup(
        &self,
        structure: &FinancialStructure,
        fundcenter: &str,
        fund: &str,
        fy: i32,
        quarter: Quarter,
    ) -> Result<AllocationRollup> {
        let root = structure.require_fund_center(fundcenter)?;
        let fund = normalize_code(fund);
        let mut rollup = AllocationRollup {
            fundcenter: root.fundcenter.clone(),
            own: Decimal::ZERO,
            fund_centers: Decimal::ZERO,
            cost_centers: Decimal::ZERO,
        };

        for allocation in self.allocations.values() {
            if allocation.fund != fund || allocation.fy != fy || allocation.quarter != quarter {
                continue;
            }
            match &allocation.node {
                OrgNode::FundCenter(code) if *code == root.fundcenter => {
                    rollup.own += allocation.amount;
                }
                OrgNode::FundCenter(code) => {
                    if structure.is_descendant_of(&root.fundcenter, code)? {
                        rollup.fund_centers += allocation.amount;
                    }
                }
                OrgNode::CostCenter(code) => {
                    if structure.is_descendant_of(&root.fundcenter, code)? {
                        rollup.cost_centers += allocation.amount;
                    }
                }
            }
        }
        Ok(rollup)
    }

    /// Cost center allocations summed into every ancestor fund center, keyed by
    /// fund center code.
    pub fn rollup_to_ancestors(
        &self,
        structure: &FinancialStructure,
        fund: &str,
        fy: i32,
        quarter: Quarter,
    ) -> Result<BTreeMap<String, Decimal>> {
        let fund = normalize_code(fund);
        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for allocation in self.allocations.values() {
            if allocation.fund != fund || allocation.fy != fy || allocation.quarter != quarter {
                continue;
            }
            let OrgNode::CostCenter(code) = &allocation.node else {
                continue;
            };
            let cost_center = structure.require_cost_center(code)?;
            *totals.entry(cost_center.parent.clone()).or_default() += allocation.amount;
            for ancestor in structure.fund_center_ancestors(&cost_center.parent)? {
                *totals.entry(ancestor.fundcenter.clone()).or_default() += allocation.amount;
            }
        }
        Ok(totals)
    }
}
