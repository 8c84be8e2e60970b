/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The cache/memory-bandwidth controller: translates resolved bitmasks into
//! writes against the `resctrl` pseudo-filesystem. All writes are
//! serialized by the caller holding the pipeline lock, per the
//! shared-resource policy; this module does no locking of its own.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use common::{Error, Result};

use crate::controller::{Controller, EnforcementRequest};

const MON_GROUPS_DIR: &str = "mon_groups";
const SCHEMATA_FILE: &str = "schemata";
const TASKS_FILE: &str = "tasks";

/// Read `/proc/mounts` looking for a `resctrl` filesystem entry. Absence is
/// not an error: callers degrade to no enforcement rather than fail
/// startup, since not every host carries RDT hardware.
pub fn find_mount() -> Option<PathBuf> {
    find_mount_in(Path::new("/proc/mounts"))
}

fn find_mount_in(mounts_file: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(mounts_file).ok()?;
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let _device = fields.next()?;
        let mount_point = fields.next()?;
        let fs_type = fields.next()?;
        if fs_type == "resctrl" {
            return Some(PathBuf::from(mount_point));
        }
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct ClassSchema {
    /// `cache id -> bitmask`, rendered as an `L3:id=mask;...` line.
    pub l3: Vec<(u32, u64)>,
    /// code/data split variant; when set, takes precedence over `l3`.
    pub l3_code_data: Option<(Vec<(u32, u64)>, Vec<(u32, u64)>)>,
    /// `cache id -> value`, rendered as an `MB:id=value;...` line.
    pub mb: Vec<(u32, String)>,
    pub monitoring: bool,
}

impl ClassSchema {
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some((code, data)) = &self.l3_code_data {
            out.push_str(&format!("L3CODE:{}\n", render_pairs(code)));
            out.push_str(&format!("L3DATA:{}\n", render_pairs(data)));
        } else if !self.l3.is_empty() {
            out.push_str(&format!(
                "L3:{}\n",
                self.l3
                    .iter()
                    .map(|(id, mask)| format!("{id}={mask:x}"))
                    .collect::<Vec<_>>()
                    .join(";")
            ));
        }
        if !self.mb.is_empty() {
            out.push_str(&format!(
                "MB:{}\n",
                self.mb
                    .iter()
                    .map(|(id, v)| format!("{id}={v}"))
                    .collect::<Vec<_>>()
                    .join(";")
            ));
        }
        out
    }
}

fn render_pairs(pairs: &[(u32, u64)]) -> String {
    pairs
        .iter()
        .map(|(id, mask)| format!("{id}={mask:x}"))
        .collect::<Vec<_>>()
        .join(";")
}

pub struct ResctrlController {
    mount_point: PathBuf,
    classes: Mutex<HashMap<String, ClassSchema>>,
}

impl ResctrlController {
    pub fn new(mount_point: PathBuf) -> Self {
        Self {
            mount_point,
            classes: Mutex::new(HashMap::new()),
        }
    }

    fn class_dir(&self, class: &str) -> PathBuf {
        self.mount_point.join(class)
    }

    /// Create (or update) a class's control group and write its resolved
    /// schema atomically: render to a temp file in the same directory, then
    /// rename over `schemata` so a reader never observes a partial write.
    pub fn upsert_class(&self, name: &str, schema: ClassSchema) -> Result<()> {
        let dir = self.class_dir(name);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::HookFailed(format!("creating resctrl group {dir:?}: {e}")))?;
        let schemata_path = dir.join(SCHEMATA_FILE);
        let tmp_path = dir.join(format!("{SCHEMATA_FILE}.tmp"));
        fs::write(&tmp_path, schema.render())
            .map_err(|e| Error::HookFailed(format!("writing {tmp_path:?}: {e}")))?;
        fs::rename(&tmp_path, &schemata_path)
            .map_err(|e| Error::HookFailed(format!("renaming {tmp_path:?} to {schemata_path:?}: {e}")))?;
        self.classes
            .lock()
            .expect("resctrl class table poisoned")
            .insert(name.to_string(), schema);
        Ok(())
    }

    pub fn process_assignment(&self, class: &str, pids: &[u32]) -> Result<()> {
        let path = self.class_dir(class).join(TASKS_FILE);
        self.write_tasks(&path, pids)
    }

    fn write_tasks(&self, path: &Path, pids: &[u32]) -> Result<()> {
        for pid in pids {
            match fs::write(path, pid.to_string()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(pid, ?path, "process exited before task assignment, ignoring");
                }
                Err(e) => {
                    return Err(Error::HookFailed(format!(
                        "assigning pid {pid} to {path:?}: {e}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn create_monitor_group(&self, class: &str, container_name: &str, pids: &[u32]) -> Result<()> {
        let dir = self.class_dir(class).join(MON_GROUPS_DIR).join(container_name);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::HookFailed(format!("creating monitor group {dir:?}: {e}")))?;
        self.write_tasks(&dir.join(TASKS_FILE), pids)
    }

    pub fn remove_monitor_group(&self, class: &str, container_name: &str) -> Result<()> {
        let dir = self.class_dir(class).join(MON_GROUPS_DIR).join(container_name);
        if dir.exists() {
            fs::remove_dir(&dir)
                .map_err(|e| Error::HookFailed(format!("removing monitor group {dir:?}: {e}")))?;
        }
        Ok(())
    }

    /// Enumerate existing control groups and drop those absent from
    /// `new_classes`, provided they have no assigned tasks; non-empty
    /// groups abort the whole reconfiguration so the caller can roll back
    /// to the previous resolved configuration.
    pub fn reconfigure(&self, new_classes: HashMap<String, ClassSchema>) -> Result<()> {
        let existing = self.existing_class_dirs()?;
        for name in &existing {
            if !new_classes.contains_key(name) {
                let tasks_path = self.class_dir(name).join(TASKS_FILE);
                let tasks = fs::read_to_string(&tasks_path).unwrap_or_default();
                if !tasks.trim().is_empty() {
                    return Err(Error::HookFailed(format!(
                        "refusing to remove non-empty resctrl group '{name}'"
                    )));
                }
                fs::remove_dir_all(self.class_dir(name))
                    .map_err(|e| Error::HookFailed(format!("removing group '{name}': {e}")))?;
            }
        }
        for (name, schema) in new_classes {
            self.upsert_class(&name, schema)?;
        }
        Ok(())
    }

    fn existing_class_dirs(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.mount_point) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(Error::HookFailed(format!(
                    "listing {:?}: {e}",
                    self.mount_point
                )))
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::HookFailed(e.to_string()))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    if name != "info" {
                        out.push(name.to_string());
                    }
                }
            }
        }
        Ok(out)
    }
}

impl Controller for ResctrlController {
    fn name(&self) -> &str {
        "resctrl"
    }

    fn pre_create(&self, req: &EnforcementRequest) -> Result<()> {
        if !req.pids.is_empty() {
            self.process_assignment(&req.class, &req.pids)?;
        }
        Ok(())
    }

    fn post_update(&self, req: &EnforcementRequest) -> Result<()> {
        if !req.pids.is_empty() {
            self.process_assignment(&req.class, &req.pids)?;
        }
        Ok(())
    }

    fn post_release(&self, req: &EnforcementRequest) -> Result<()> {
        warn!(cache_id = %req.cache_id, "resctrl post_release is a no-op: task membership ends when the process exits");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn find_mount_parses_resctrl_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mounts_path = dir.path().join("mounts");
        let mut file = fs::File::create(&mounts_path).unwrap();
        writeln!(file, "cgroup /sys/fs/cgroup cgroup2 rw 0 0").unwrap();
        writeln!(file, "resctrl /sys/fs/resctrl resctrl rw 0 0").unwrap();
        let found = find_mount_in(&mounts_path).unwrap();
        assert_eq!(found, PathBuf::from("/sys/fs/resctrl"));
    }

    #[test]
    fn find_mount_returns_none_without_resctrl_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mounts_path = dir.path().join("mounts");
        fs::write(&mounts_path, "cgroup /sys/fs/cgroup cgroup2 rw 0 0\n").unwrap();
        assert!(find_mount_in(&mounts_path).is_none());
    }

    #[test]
    fn schema_render_includes_l3_and_mb_lines() {
        let schema = ClassSchema {
            l3: vec![(0, 0xf0), (1, 0x0f)],
            l3_code_data: None,
            mb: vec![(0, "50%".to_string())],
            monitoring: false,
        };
        let rendered = schema.render();
        assert!(rendered.contains("L3:0=f0;1=f"));
        assert!(rendered.contains("MB:0=50%"));
    }

    #[test]
    fn upsert_class_writes_schemata_file() {
        let dir = tempfile::tempdir().unwrap();
        let controller = ResctrlController::new(dir.path().to_path_buf());
        controller
            .upsert_class(
                "default",
                ClassSchema {
                    l3: vec![(0, 0xff)],
                    l3_code_data: None,
                    mb: vec![],
                    monitoring: false,
                },
            )
            .unwrap();
        let contents = fs::read_to_string(dir.path().join("default").join(SCHEMATA_FILE)).unwrap();
        assert!(contents.contains("L3:0=ff"));
    }

    #[test]
    fn reconfigure_refuses_to_drop_nonempty_group() {
        let dir = tempfile::tempdir().unwrap();
        let controller = ResctrlController::new(dir.path().to_path_buf());
        controller
            .upsert_class("old", ClassSchema::default())
            .unwrap();
        fs::write(dir.path().join("old").join(TASKS_FILE), "1234").unwrap();

        let result = controller.reconfigure(HashMap::new());
        assert!(result.is_err());
    }
}
