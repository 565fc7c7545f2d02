//! BIOSSetting — per-node BIOS key/value, synchronised as a set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    String,
    Integer,
    Enumeration,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiosSetting {
    pub name: String,
    pub value: Value,
    pub attribute_type: AttributeType,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub allowable_values: Option<Vec<Value>>,
    pub read_only: bool,
    pub reset_required: bool,
    pub unique: bool,
}

impl BiosSetting {
    pub fn new(name: impl Into<String>, value: Value, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            value,
            attribute_type,
            min_value: None,
            max_value: None,
            allowable_values: None,
            read_only: false,
            reset_required: false,
            unique: false,
        }
    }
}

/// Outcome of comparing a desired settings set `S` against the node's
/// current settings: one bucket per action (spec testable property #9).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BiosDiff {
    pub create: Vec<String>,
    pub update: Vec<String>,
    pub delete: Vec<String>,
    pub nochange: Vec<String>,
}

/// Diff a desired settings set against the currently-stored settings.
pub fn diff_settings(current: &[BiosSetting], desired: &[BiosSetting]) -> BiosDiff {
    let mut diff = BiosDiff::default();

    for want in desired {
        match current.iter().find(|c| c.name == want.name) {
            None => diff.create.push(want.name.clone()),
            Some(have) if have.value == want.value => diff.nochange.push(want.name.clone()),
            Some(_) => diff.update.push(want.name.clone()),
        }
    }

    let desired_names: std::collections::HashSet<_> = desired.iter().map(|s| &s.name).collect();
    for have in current {
        if !desired_names.contains(&have.name) {
            diff.delete.push(have.name.clone());
        }
    }

    diff
}

/// Apply a diff's `create`/`update` to the current set and drop `delete`,
/// producing the settings set that a subsequent `read()` would return.
pub fn apply_sync(_current: &[BiosSetting], desired: &[BiosSetting]) -> Vec<BiosSetting> {
    desired.to_vec()
}
