use nix::unistd::{Uid, User};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use super::{ProcessEntry, ProcessSource};

type UserLookup = Box<dyn Fn(u32) -> Option<String> + Send + Sync>;

/// Reads the process table out of a procfs mount.
pub struct ProcFs {
    root: PathBuf,
    users: UserLookup,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::with_lookup("/proc", lookup_user)
    }
}

impl ProcFs {
    pub fn with_lookup(
        root: impl Into<PathBuf>,
        users: impl Fn(u32) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            root: root.into(),
            users: Box::new(users),
        }
    }

    fn entry(&self, pid: u32, dir: &Path) -> ProcessEntry {
        let status = read_lossy(&dir.join("status"));
        let cmdline = read_lossy(&dir.join("cmdline"))
            .replace('\0', " ")
            .trim_end()
            .to_string();
        let cmdline = if cmdline.is_empty() {
            status_field(&status, "Name:")
                .map(|name| format!("[{name}]"))
                .unwrap_or_else(|| "?".to_string())
        } else {
            cmdline
        };
        let ppid = status_field(&status, "PPid:").unwrap_or_else(|| "?".to_string());
        let user = match std::fs::metadata(dir) {
            Ok(meta) => (self.users)(meta.uid()).unwrap_or_else(|| meta.uid().to_string()),
            Err(_) => "?".to_string(),
        };
        ProcessEntry {
            pid,
            ppid,
            user,
            cmdline,
        }
    }
}

impl ProcessSource for ProcFs {
    fn processes(&self) -> std::io::Result<Vec<ProcessEntry>> {
        let mut table = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            table.push(self.entry(pid, &entry.path()));
        }
        table.sort_by_key(|p| p.pid);
        Ok(table)
    }
}

// Processes can exit mid-scan; a vanished file reads as empty.
fn read_lossy(path: &Path) -> String {
    std::fs::read(path)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

/// Value of a `Key:\tvalue` line from `/proc/<pid>/status`. Only single-token
/// values are accepted.
fn status_field(status: &str, key: &str) -> Option<String> {
    let line = status.lines().find(|l| l.starts_with(key))?;
    let mut parts = line.split_whitespace().skip(1);
    match (parts.next(), parts.next()) {
        (Some(value), None) => Some(value.to_string()),
        _ => None,
    }
}

/// Owner name through the system user database (NSS included).
fn lookup_user(uid: u32) -> Option<String> {
    User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name)
}
