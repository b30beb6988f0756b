/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Parent pid as reported by the OS, `?` when unavailable.
    pub ppid: String,
    /// Owner name, or the numeric uid when it cannot be resolved.
    pub user: String,
    pub cmdline: String,
}

/// Process enumeration abstracted behind a common interface.
/// Each platform provides its own implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait ProcessSource: Send + Sync {
    /// Snapshot of running processes, ordered by pid.
    fn processes(&self) -> std::io::Result<Vec<ProcessEntry>>;
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::ProcFs;

#[cfg(not(unix))]
compile_error!("process enumeration is only implemented for unix targets");
