/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Percentage-to-bitmask resolution: the core algorithm behind `schemata`
//! generation. Operates on a single cache id's full bitmask at a time; the
//! caller (`resctrl::ResctrlController`) runs it once per declared cache id.

use tracing::warn;

use common::{Error, Result};

#[derive(Debug, Clone)]
pub struct PartitionPct {
    pub name: String,
    pub pct: u8,
}

/// Resolve declared partition percentages into disjoint, contiguous
/// bitmasks covering `bit_width` bits, each promoted to at least
/// `min_bits` wide. Partitions are walked smallest-percentage-first so a
/// small partition gets its chance to meet the minimum before the larger
/// ones consume the remaining width; the last partition (by that order)
/// absorbs whatever bits remain.
pub fn resolve_partitions(
    partitions: &[PartitionPct],
    bit_width: u32,
    min_bits: u32,
) -> Result<Vec<(String, u64)>> {
    if partitions.is_empty() {
        return Ok(Vec::new());
    }

    let total: u32 = partitions.iter().map(|p| p.pct as u32).sum();
    if total > 100 {
        return Err(Error::ConfigRejected {
            path: "rdt.partitions".to_string(),
            reason: format!("partition percentages sum to {total}%, must not exceed 100%"),
        });
    }
    if total < 100 {
        warn!(total, "rdt partitions leave unused capacity");
    }

    let mut ordered = partitions.to_vec();
    ordered.sort_by_key(|p| p.pct);

    let mut results = Vec::with_capacity(ordered.len());
    let mut base_bit = 0u32;
    let mut bits_remaining = bit_width;
    let mut pct_remaining: u64 = ordered.iter().map(|p| p.pct as u64).sum();

    let last = ordered.len() - 1;
    for (i, partition) in ordered.iter().enumerate() {
        let num_bits = if i == last {
            bits_remaining
        } else {
            let raw = (partition.pct as u64 * bits_remaining as u64) / pct_remaining.max(1);
            (raw as u32).max(min_bits).min(bits_remaining)
        };
        if num_bits > bits_remaining {
            return Err(Error::ConfigRejected {
                path: format!("rdt.partitions.{}", partition.name),
                reason: "minimum-contiguous-bits constraint cannot be satisfied for every partition"
                    .to_string(),
            });
        }
        let mask = bitmask(num_bits, base_bit);
        results.push((partition.name.clone(), mask));
        base_bit += num_bits;
        bits_remaining -= num_bits;
        pct_remaining = pct_remaining.saturating_sub(partition.pct as u64);
    }

    Ok(results)
}

fn bitmask(num_bits: u32, base_bit: u32) -> u64 {
    if num_bits == 0 {
        0
    } else {
        ((1u64 << num_bits) - 1) << base_bit
    }
}

/// A class expressed as a percentage range of its owning partition's bits.
pub fn resolve_class_range(partition_bits: u32, partition_base: u32, low_pct: u8, high_pct: u8) -> u64 {
    if partition_bits == 0 {
        return 0;
    }
    let lsb = (low_pct as u64 * partition_bits as u64) / 100;
    let msb_exclusive = ((high_pct as u64 * partition_bits as u64) / 100).max(lsb + 1);
    let msb = (msb_exclusive - 1).min(partition_bits as u64 - 1);
    bitmask((msb - lsb + 1) as u32, partition_base + lsb as u32)
}

/// A class expressed as an absolute bitmask must sit entirely within its
/// partition's mask and itself be one contiguous run.
pub fn verify_absolute_mask(mask: u64, partition_mask: u64) -> Result<()> {
    if mask & !partition_mask != 0 {
        return Err(Error::ConfigRejected {
            path: "rdt.classes".to_string(),
            reason: "class bitmask is not contained in its partition's bitmask".to_string(),
        });
    }
    if !is_contiguous(mask) {
        return Err(Error::ConfigRejected {
            path: "rdt.classes".to_string(),
            reason: "class bitmask is not a single contiguous run of bits".to_string(),
        });
    }
    Ok(())
}

fn is_contiguous(mask: u64) -> bool {
    if mask == 0 {
        return false;
    }
    let shifted = mask >> mask.trailing_zeros();
    shifted & (shifted + 1) == 0
}

#[derive(Debug, Clone, Copy)]
pub enum MbValue {
    Percent(u8),
    MegabytesPerSecond(u32),
}

/// Clamp a percentage-mode bandwidth value to the kernel-reported minimum
/// floor; cap an MB/s-mode value at the owning partition's allocation.
pub fn resolve_mb(value: MbValue, partition_cap: MbValue, min_percent_floor: u8) -> MbValue {
    match (value, partition_cap) {
        (MbValue::Percent(pct), _) => MbValue::Percent(pct.max(min_percent_floor)),
        (MbValue::MegabytesPerSecond(mbps), MbValue::MegabytesPerSecond(cap)) => {
            MbValue::MegabytesPerSecond(mbps.min(cap))
        }
        (MbValue::MegabytesPerSecond(mbps), MbValue::Percent(_)) => {
            MbValue::MegabytesPerSecond(mbps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_resolution_with_minimum_bit_promotion() {
        let partitions = vec![
            PartitionPct { name: "A".into(), pct: 10 },
            PartitionPct { name: "B".into(), pct: 10 },
            PartitionPct { name: "C".into(), pct: 80 },
        ];
        let resolved = resolve_partitions(&partitions, 20, 2).unwrap();
        let as_map: std::collections::HashMap<_, _> = resolved.into_iter().collect();
        assert_eq!(as_map["A"], 0b11);
        assert_eq!(as_map["B"], 0b1100);
        assert_eq!(as_map["C"], 0xFFFF0u64);
    }

    #[test]
    fn partitions_over_100_percent_are_rejected() {
        let partitions = vec![
            PartitionPct { name: "A".into(), pct: 60 },
            PartitionPct { name: "B".into(), pct: 60 },
        ];
        assert!(resolve_partitions(&partitions, 20, 1).is_err());
    }

    #[test]
    fn partitions_under_100_percent_are_accepted() {
        let partitions = vec![PartitionPct { name: "A".into(), pct: 50 }];
        let resolved = resolve_partitions(&partitions, 10, 1).unwrap();
        assert_eq!(resolved[0].1, 0b1111111111);
    }

    #[test]
    fn class_range_is_contiguous_and_offset_from_partition_base() {
        let mask = resolve_class_range(16, 4, 0, 50);
        assert!(is_contiguous(mask));
        assert_eq!(mask.trailing_zeros(), 4);
    }

    #[test]
    fn absolute_mask_outside_partition_is_rejected() {
        let partition_mask = 0b1111_0000u64;
        assert!(verify_absolute_mask(0b0000_1100, partition_mask).is_err());
        assert!(verify_absolute_mask(0b0110_0000, partition_mask).is_ok());
    }

    #[test]
    fn non_contiguous_absolute_mask_is_rejected() {
        let partition_mask = 0xFFu64;
        assert!(verify_absolute_mask(0b1010_1010, partition_mask).is_err());
    }
}
