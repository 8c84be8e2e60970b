/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! CPU range string parsing and rendering (`"0-3,8"` <-> `[0, 1, 2, 3, 8]`),
//! shared by the pools reference policy and its configuration fragment.

pub fn parse_range(text: &str) -> Result<Vec<u32>, String> {
    let mut cpus = Vec::new();
    let text = text.trim();
    if text.is_empty() {
        return Ok(cpus);
    }
    for part in text.split(',') {
        let part = part.trim();
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo
                .trim()
                .parse()
                .map_err(|_| format!("'{part}' is not a valid cpu range"))?;
            let hi: u32 = hi
                .trim()
                .parse()
                .map_err(|_| format!("'{part}' is not a valid cpu range"))?;
            if lo > hi {
                return Err(format!("'{part}' has a reversed range"));
            }
            cpus.extend(lo..=hi);
        } else {
            cpus.push(
                part.parse()
                    .map_err(|_| format!("'{part}' is not a valid cpu id"))?,
            );
        }
    }
    Ok(cpus)
}

pub fn format_range(cpus: &[u32]) -> String {
    let mut sorted = cpus.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
            end = sorted[i + 1];
            i += 1;
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
        i += 1;
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_handles_mixed_runs_and_singletons() {
        assert_eq!(parse_range("0-3,8").unwrap(), vec![0, 1, 2, 3, 8]);
    }

    #[test]
    fn format_range_compresses_contiguous_runs() {
        assert_eq!(format_range(&[8, 0, 1, 2, 3]), "0-3,8");
    }

    #[test]
    fn parse_and_format_round_trip() {
        let text = "0-3,8,10-12";
        assert_eq!(format_range(&parse_range(text).unwrap()), text);
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(parse_range("5-2").is_err());
    }
}
