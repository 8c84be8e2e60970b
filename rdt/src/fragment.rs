/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The `rdt` top-level configuration key. Registered with `cfgtree::Tree`
//! by `resourced::main`; bit-width-dependent resolution (which needs the
//! hardware-reported cache topology) happens in `resctrl`, not here -- this
//! fragment only validates that percentages are well-formed and sum to
//! at most 100 per partition.

use std::collections::BTreeMap;

use cfgtree::FragmentSpec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RdtFragment {
    #[serde(default)]
    pub options: RdtOptions,
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RdtOptions {
    #[serde(default)]
    pub l3: SubsystemOption,
    #[serde(default)]
    pub mb: SubsystemOption,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubsystemOption {
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartitionDef {
    #[serde(rename = "l3Allocation", default)]
    pub l3_allocation: Allocation,
    #[serde(rename = "mbAllocation", default)]
    pub mb_allocation: Allocation,
    #[serde(default)]
    pub classes: BTreeMap<String, ClassDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub all: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassDef {
    #[serde(rename = "l3Schema", default)]
    pub l3_schema: L3Schema,
    #[serde(rename = "mbSchema", default)]
    pub mb_schema: Allocation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct L3Schema {
    pub all: Option<String>,
    pub code: Option<String>,
    pub data: Option<String>,
}

/// Parse a `"NN%"` string into its integer percentage.
pub fn parse_percent(text: &str) -> Result<u8, String> {
    let trimmed = text
        .strip_suffix('%')
        .ok_or_else(|| format!("'{text}' is not a percentage (expected a trailing '%')"))?;
    trimmed
        .trim()
        .parse::<u8>()
        .map_err(|_| format!("'{text}' is not a valid percentage"))
}

impl FragmentSpec for RdtFragment {
    fn validate(&self) -> Result<(), String> {
        for (name, partition) in &self.partitions {
            if let Some(all) = &partition.l3_allocation.all {
                let pct = parse_percent(all)?;
                if pct > 100 {
                    return Err(format!("partition '{name}' l3Allocation exceeds 100%"));
                }
            }
            for (class_name, class) in &partition.classes {
                if let Some(all) = &class.l3_schema.all {
                    parse_percent(all)?;
                }
                if let (Some(code), Some(data)) = (&class.l3_schema.code, &class.l3_schema.data) {
                    parse_percent(code)?;
                    parse_percent(data)?;
                } else if class.l3_schema.code.is_some() != class.l3_schema.data.is_some() {
                    return Err(format!(
                        "class '{class_name}' must set both l3Schema.code and l3Schema.data or neither"
                    ));
                }
            }
        }

        let total: u32 = self
            .partitions
            .values()
            .filter_map(|p| p.l3_allocation.all.as_deref())
            .filter_map(|s| parse_percent(s).ok())
            .map(u32::from)
            .sum();
        if total > 100 {
            return Err(format!(
                "rdt partition l3Allocation percentages sum to {total}%, must not exceed 100%"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_percent_accepts_trailing_percent_sign() {
        assert_eq!(parse_percent("42%").unwrap(), 42);
        assert!(parse_percent("42").is_err());
    }

    #[test]
    fn validate_rejects_partition_sum_over_100() {
        let mut fragment = RdtFragment::default();
        fragment.partitions.insert(
            "a".into(),
            PartitionDef {
                l3_allocation: Allocation { all: Some("60%".into()) },
                ..Default::default()
            },
        );
        fragment.partitions.insert(
            "b".into(),
            PartitionDef {
                l3_allocation: Allocation { all: Some("60%".into()) },
                ..Default::default()
            },
        );
        assert!(fragment.validate().is_err());
    }
}
