//! In-memory financial structure: funds, sources, fund centers and cost centers.
//!
//! Fund centers form a forest addressed by [`SequencePath`]. The store assigns every
//! sequence itself, so callers only name a parent.

use crate::error::{BftError, Result};
use crate::schema::{CostCenter, Fund, FundCenter, NewCostCenter, NewFundCenter, Source};
use crate::sequence::{new_root_sequence, next_child_sequence, SequencePath};
use crate::utils::{capitalize, normalize_code};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancialStructure {
    funds: BTreeMap<String, Fund>,
    sources: BTreeMap<String, Source>,
    fund_centers: BTreeMap<String, FundCenter>,
    cost_centers: BTreeMap<String, CostCenter>,
}

impl FinancialStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fund(&mut self, fund: Fund) -> Result<&Fund> {
        fund.validate()?;
        if self.funds.contains_key(&fund.fund) {
            return Err(BftError::DuplicateFund(fund.fund));
        }
        let code = fund.fund.clone();
        Ok(&*self.funds.entry(code).or_insert(fund))
    }

    pub fn add_source(&mut self, source: &str) -> Result<&Source> {
        let source = Source::new(source);
        if self.sources.contains_key(&source.source) {
            return Err(BftError::DuplicateSource(source.source));
        }
        let name = source.source.clone();
        Ok(&*self.sources.entry(name).or_insert(source))
    }

    pub fn fund(&self, code: &str) -> Option<&Fund> {
        self.funds.get(&normalize_code(code))
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources.get(&capitalize(name))
    }

    pub fn fund_center(&self, code: &str) -> Option<&FundCenter> {
        self.fund_centers.get(&normalize_code(code))
    }

    pub fn cost_center(&self, code: &str) -> Option<&CostCenter> {
        self.cost_centers.get(&normalize_code(code))
    }

    pub fn funds(&self) -> impl Iterator<Item = &Fund> {
        self.funds.values()
    }

    pub fn fund_centers(&self) -> impl Iterator<Item = &FundCenter> {
        self.fund_centers.values()
    }

    pub fn cost_centers(&self) -> impl Iterator<Item = &CostCenter> {
        self.cost_centers.values()
    }

    pub fn fund_codes(&self) -> BTreeSet<String> {
        self.funds.keys().cloned().collect()
    }

    pub fn cost_center_codes(&self) -> BTreeSet<String> {
        self.cost_centers.keys().cloned().collect()
    }

    /// Every sequence in use, fund centers and cost centers alike.
    pub fn family(&self) -> BTreeSet<SequencePath> {
        self.fund_centers
            .values()
            .map(|fc| fc.sequence.clone())
            .chain(self.cost_centers.values().map(|cc| cc.sequence.clone()))
            .collect()
    }

    pub fn sequence_exists(&self, sequence: &SequencePath) -> bool {
        self.fund_centers.values().any(|fc| &fc.sequence == sequence)
            || self.cost_centers.values().any(|cc| &cc.sequence == sequence)
    }

    pub fn new_root_sequence(&self) -> Result<SequencePath> {
        new_root_sequence(self.fund_centers.values().map(|fc| &fc.sequence))
    }

    /// Sequence the next child of `parent` would receive.
    pub fn next_child_sequence(&self, parent: &str, is_cost_center_child: bool) -> Result<SequencePath> {
        let parent_fc = self.require_fund_center(parent)?;
        let sequence = if is_cost_center_child {
            let siblings: Vec<&SequencePath> = self
                .cost_centers
                .values()
                .filter(|cc| cc.parent == parent_fc.fundcenter)
                .map(|cc| &cc.sequence)
                .collect();
            next_child_sequence(&parent_fc.sequence, siblings, true)?
        } else {
            let siblings: Vec<&SequencePath> = self
                .fund_centers
                .values()
                .filter(|fc| fc.parent.as_deref() == Some(parent_fc.fundcenter.as_str()))
                .map(|fc| &fc.sequence)
                .collect();
            next_child_sequence(&parent_fc.sequence, siblings, false)?
        };
        Ok(sequence)
    }

    pub fn add_fund_center(&mut self, new: NewFundCenter) -> Result<&FundCenter> {
        let code = normalize_code(&new.fundcenter);
        if self.fund_centers.contains_key(&code) {
            return Err(BftError::DuplicateFundCenter(code));
        }
        let parent = new.parent.as_deref().map(normalize_code);
        if parent.as_deref() == Some(code.as_str()) {
            return Err(BftError::SelfParent(code));
        }

        let sequence = match &parent {
            None => self.new_root_sequence()?,
            Some(parent) => self.next_child_sequence(parent, false)?,
        };
        self.insert_fund_center(FundCenter {
            level: sequence.depth(),
            fundcenter: code,
            shortname: new.shortname.map(|s| s.trim().to_uppercase()),
            sequence,
            parent,
        })
    }

    pub fn add_cost_center(&mut self, new: NewCostCenter) -> Result<&CostCenter> {
        let code = normalize_code(&new.costcenter);
        if self.cost_centers.contains_key(&code) {
            return Err(BftError::DuplicateCostCenter(code));
        }
        let fund = self
            .fund(&new.fund)
            .ok_or_else(|| BftError::FundNotFound(new.fund.clone()))?
            .fund
            .clone();
        let source = self
            .source(&new.source)
            .ok_or_else(|| BftError::SourceNotFound(new.source.clone()))?
            .source
            .clone();
        let parent = normalize_code(&new.parent);
        let sequence = self.next_child_sequence(&parent, true)?;
        self.guard_sequence(&sequence)?;

        info!("Cost center {} created with sequence {}", code, sequence);
        let cost_center = CostCenter {
            costcenter: code.clone(),
            shortname: new.shortname.map(|s| s.trim().to_uppercase()),
            fund,
            source,
            isforecastable: new.isforecastable,
            isupdatable: new.isupdatable,
            note: new.note,
            level: sequence.depth(),
            sequence,
            parent,
        };
        Ok(&*self.cost_centers.entry(code).or_insert(cost_center))
    }

    /// Inserts a fund center whose sequence was computed elsewhere. Rejects a
    /// sequence already held by another node.
    pub fn insert_fund_center(&mut self, fund_center: FundCenter) -> Result<&FundCenter> {
        if self.fund_centers.contains_key(&fund_center.fundcenter) {
            return Err(BftError::DuplicateFundCenter(fund_center.fundcenter));
        }
        self.guard_sequence(&fund_center.sequence)?;
        info!(
            "Fund center {} created with sequence {}",
            fund_center.fundcenter, fund_center.sequence
        );
        let code = fund_center.fundcenter.clone();
        Ok(&*self.fund_centers.entry(code).or_insert(fund_center))
    }

    fn guard_sequence(&self, sequence: &SequencePath) -> Result<()> {
        if self.sequence_exists(sequence) {
            return Err(BftError::DuplicateSequence(sequence.to_string()));
        }
        Ok(())
    }

    /// Moves a fund center under `new_parent` (or to the root when `None`).
    ///
    /// Only the moved node gets a new sequence and level. Its descendants keep
    /// their previous sequences.
    pub fn reparent_fund_center(&mut self, code: &str, new_parent: Option<&str>) -> Result<&FundCenter> {
        let code = normalize_code(code);
        let current = self.require_fund_center(&code)?.clone();
        let new_parent = new_parent.map(normalize_code);
        if new_parent.as_deref() == Some(code.as_str()) {
            return Err(BftError::SelfParent(code));
        }

        let sequence = match &new_parent {
            None if current.sequence.is_root() => current.sequence.clone(),
            None => self.new_root_sequence()?,
            Some(parent) => {
                let parent_fc = self.require_fund_center(parent)?;
                if parent_fc.sequence.is_parent_of(&current.sequence)? {
                    current.sequence.clone()
                } else {
                    self.next_child_sequence(parent, false)?
                }
            }
        };
        if sequence != current.sequence {
            self.guard_sequence(&sequence)?;
        }

        debug!(
            "Fund center {} moved from {} to {}",
            code, current.sequence, sequence
        );
        let fund_center = self
            .fund_centers
            .get_mut(&code)
            .ok_or_else(|| BftError::FundCenterNotFound(code.clone()))?;
        fund_center.level = sequence.depth();
        fund_center.sequence = sequence;
        fund_center.parent = new_parent;
        Ok(&*fund_center)
    }

    /// Moves a cost center under another fund center.
    pub fn reparent_cost_center(&mut self, code: &str, new_parent: &str) -> Result<&CostCenter> {
        let code = normalize_code(code);
        let current = self.require_cost_center(&code)?.clone();
        let new_parent = normalize_code(new_parent);
        let parent_fc = self.require_fund_center(&new_parent)?;

        let sequence = if parent_fc.sequence.is_parent_of(&current.sequence)? {
            current.sequence.clone()
        } else {
            let next = self.next_child_sequence(&new_parent, true)?;
            self.guard_sequence(&next)?;
            next
        };

        let cost_center = self
            .cost_centers
            .get_mut(&code)
            .ok_or_else(|| BftError::CostCenterNotFound(code.clone()))?;
        cost_center.level = sequence.depth();
        cost_center.sequence = sequence;
        cost_center.parent = new_parent;
        Ok(&*cost_center)
    }

    pub fn set_cost_center_flags(&mut self, code: &str, isforecastable: bool, isupdatable: bool) -> Result<()> {
        let code = normalize_code(code);
        let cost_center = self
            .cost_centers
            .get_mut(&code)
            .ok_or(BftError::CostCenterNotFound(code))?;
        cost_center.isforecastable = isforecastable;
        cost_center.isupdatable = isupdatable;
        Ok(())
    }

    pub fn require_fund_center(&self, code: &str) -> Result<&FundCenter> {
        self.fund_center(code)
            .ok_or_else(|| BftError::FundCenterNotFound(normalize_code(code)))
    }

    pub fn require_cost_center(&self, code: &str) -> Result<&CostCenter> {
        self.cost_center(code)
            .ok_or_else(|| BftError::CostCenterNotFound(normalize_code(code)))
    }

    pub fn child_fund_centers(&self, parent: &str) -> Vec<&FundCenter> {
        let parent = normalize_code(parent);
        self.fund_centers
            .values()
            .filter(|fc| fc.parent.as_deref() == Some(parent.as_str()))
            .collect()
    }

    pub fn child_cost_centers(&self, parent: &str) -> Vec<&CostCenter> {
        let parent = normalize_code(parent);
        self.cost_centers
            .values()
            .filter(|cc| cc.parent == parent)
            .collect()
    }

    /// Cost centers sharing the parent fund center.
    pub fn cost_center_siblings(&self, parent: &str) -> Vec<&CostCenter> {
        self.child_cost_centers(parent)
    }

    pub fn has_children(&self, code: &str) -> usize {
        self.child_fund_centers(code).len() + self.child_cost_centers(code).len()
    }

    /// Fund centers strictly below `code`, by sequence.
    pub fn fund_center_descendants(&self, code: &str) -> Result<Vec<&FundCenter>> {
        let root = self.require_fund_center(code)?;
        let mut descendants = Vec::new();
        for fc in self.fund_centers.values() {
            if root.sequence.is_ancestor_of(&fc.sequence)? {
                descendants.push(fc);
            }
        }
        Ok(descendants)
    }

    /// Cost centers anywhere below `code`, by sequence.
    pub fn cost_center_descendants(&self, code: &str) -> Result<Vec<&CostCenter>> {
        let root = self.require_fund_center(code)?;
        let mut descendants = Vec::new();
        for cc in self.cost_centers.values() {
            if root.sequence.is_ancestor_of(&cc.sequence)? {
                descendants.push(cc);
            }
        }
        Ok(descendants)
    }

    /// Ancestors of a fund center, nearest first, following parent links.
    pub fn fund_center_ancestors(&self, code: &str) -> Result<Vec<&FundCenter>> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.require_fund_center(code)?;
        while let Some(parent) = current.parent.as_deref() {
            if !seen.insert(parent.to_string()) {
                break;
            }
            current = self.require_fund_center(parent)?;
            ancestors.push(current);
        }
        Ok(ancestors)
    }

    /// Whether `child` (fund center or cost center code) sits directly under `parent`.
    pub fn is_child_of(&self, parent: &str, child: &str) -> Result<bool> {
        let Some(parent_fc) = self.fund_center(parent) else {
            return Ok(false);
        };
        if let Some(fc) = self.fund_center(child) {
            return parent_fc.sequence.is_parent_of(&fc.sequence);
        }
        if let Some(cc) = self.cost_center(child) {
            return Ok(cc.parent == parent_fc.fundcenter);
        }
        Ok(false)
    }

    /// Whether `child` (fund center or cost center code) sits anywhere under `parent`.
    pub fn is_descendant_of(&self, parent: &str, child: &str) -> Result<bool> {
        let parent_fc = self.require_fund_center(parent)?;
        let child_sequence = match (self.fund_center(child), self.cost_center(child)) {
            (Some(fc), _) => &fc.sequence,
            (None, Some(cc)) => &cc.sequence,
            (None, None) => return Ok(false),
        };
        parent_fc.sequence.is_ancestor_of(child_sequence)
    }

    /// Valid (cost center, fund center) pairs according to the structure.
    pub fn valid_pairs(&self) -> HashSet<(String, String)> {
        self.cost_centers
            .values()
            .map(|cc| (cc.costcenter.clone(), cc.parent.clone()))
            .collect()
    }

    /// Cost centers whose line items must not be touched by an import.
    pub fn not_updatable_cost_centers(&self) -> HashSet<String> {
        self.cost_centers
            .values()
            .filter(|cc| !cc.isupdatable)
            .map(|cc| cc.costcenter.clone())
            .collect()
    }
}
