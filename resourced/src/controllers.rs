/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Builds the enforcement controller table: a real `resctrl` controller for
//! cache/memory-bandwidth when the pseudo-filesystem is mounted, degrading
//! to the no-op stand-in otherwise so a node without `resctrl` support
//! still runs containers, just without cache/memory-bandwidth isolation.
//! CPU-set and I/O controllers are always the no-op stand-in -- this
//! system does not implement those subsystems.

use std::collections::BTreeMap;
use std::fs;

use rdt::resctrl::{ClassSchema, ResctrlController};
use rdt::resolve::{resolve_class_range, resolve_partitions, PartitionPct};
use rdt::{fragment::RdtFragment, noop::NoopController, Controller};
use statecache::Controller as ControllerKind;
use tracing::{info, warn};

const DEFAULT_BIT_WIDTH: u32 = 20;
const DEFAULT_MIN_BITS: u32 = 2;

fn detect_bit_width(mount: &std::path::Path) -> u32 {
    let path = mount.join("info").join("L3").join("cbm_mask");
    match fs::read_to_string(&path) {
        Ok(text) => {
            let trimmed = text.trim();
            match u64::from_str_radix(trimmed, 16) {
                Ok(mask) if mask != 0 => 64 - mask.leading_zeros(),
                _ => DEFAULT_BIT_WIDTH,
            }
        }
        Err(_) => DEFAULT_BIT_WIDTH,
    }
}

/// Two-stage resolution: first split the full bitmask across partitions by
/// their own `l3Allocation.all` share, then split each partition's assigned
/// range across its classes by their `l3Schema.all` share, walked as
/// cumulative percentage ranges (class one takes `0..p1`, class two takes
/// `p1..p1+p2`, and so on) via `resolve_class_range`.
fn build_resctrl(mount: std::path::PathBuf, fragment: &RdtFragment) -> ResctrlController {
    let controller = ResctrlController::new(mount.clone());
    let bit_width = detect_bit_width(&mount);

    let partition_pcts: Vec<PartitionPct> = fragment
        .partitions
        .iter()
        .filter_map(|(name, partition)| {
            let pct = partition
                .l3_allocation
                .all
                .as_deref()
                .and_then(|s| rdt::fragment::parse_percent(s).ok())?;
            Some(PartitionPct { name: name.clone(), pct })
        })
        .collect();
    if partition_pcts.is_empty() {
        return controller;
    }

    let partition_masks = match resolve_partitions(&partition_pcts, bit_width, DEFAULT_MIN_BITS) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, "failed to resolve rdt partitions");
            return controller;
        }
    };

    for (partition_name, partition_mask) in partition_masks {
        let Some(partition) = fragment.partitions.get(&partition_name) else { continue };
        let partition_base = partition_mask.trailing_zeros();
        let partition_bits = partition_mask.count_ones();

        let mut classes: Vec<(&String, u8)> = partition
            .classes
            .iter()
            .filter_map(|(class_name, class)| {
                let pct = class
                    .l3_schema
                    .all
                    .as_deref()
                    .and_then(|s| rdt::fragment::parse_percent(s).ok())?;
                Some((class_name, pct))
            })
            .collect();
        classes.sort_by_key(|(_, pct)| *pct);

        let mut low = 0u8;
        for (class_name, pct) in classes {
            let high = (low as u32 + pct as u32).min(100) as u8;
            let mask = resolve_class_range(partition_bits, partition_base, low, high);
            let schema = ClassSchema {
                l3: vec![(0, mask)],
                l3_code_data: None,
                mb: vec![],
                monitoring: false,
            };
            if let Err(e) = controller.upsert_class(class_name, schema) {
                warn!(partition = partition_name, class = class_name, error = %e, "failed to write resctrl schema");
            }
            low = high;
        }
    }

    controller
}

pub fn build(fragment: &RdtFragment) -> BTreeMap<ControllerKind, Box<dyn Controller>> {
    let mut controllers: BTreeMap<ControllerKind, Box<dyn Controller>> = BTreeMap::new();

    match rdt::resctrl::find_mount() {
        Some(mount) => {
            info!(?mount, "resctrl filesystem detected");
            // Both enforcement kinds write the same `schemata` file; two
            // independent controller instances targeting the same mount
            // point is harmless, the writes are idempotent.
            controllers.insert(ControllerKind::Cache, Box::new(build_resctrl(mount.clone(), fragment)));
            controllers.insert(ControllerKind::MemoryBandwidth, Box::new(build_resctrl(mount, fragment)));
        }
        None => {
            warn!("no resctrl mount found, cache/memory-bandwidth enforcement disabled");
            controllers.insert(ControllerKind::Cache, Box::new(NoopController::cache()));
            controllers.insert(ControllerKind::MemoryBandwidth, Box::new(NoopController::memory_bandwidth()));
        }
    }
    controllers.insert(ControllerKind::CpuSet, Box::new(NoopController::cpuset()));
    controllers.insert(ControllerKind::Io, Box::new(NoopController::io()));

    controllers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_always_registers_all_four_controller_kinds() {
        let fragment = RdtFragment::default();
        let controllers = build(&fragment);
        assert_eq!(controllers.len(), 4);
    }
}
