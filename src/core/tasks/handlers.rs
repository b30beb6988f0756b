use chrono::{DateTime, SecondsFormat, Utc};
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use std::fs::Metadata;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::CommandLine;
use crate::platform::ProcessSource;

pub const BACKGROUND_STARTED: &str = "[+] Binary executed successfully in background";

/// One line per directory entry: mode, mtime (RFC 3339, UTC), size, name.
pub fn list_directory(path: &Path) -> std::io::Result<String> {
    let mut entries = std::fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut out = String::new();
    for entry in entries {
        // DirEntry::metadata does not follow symlinks.
        let meta = entry.metadata()?;
        let modified: DateTime<Utc> = meta.modified()?.into();
        out.push_str(&format!(
            "{:<15} {:<22} {:<10} {:<20}\n",
            mode_string(&meta),
            modified.to_rfc3339_opts(SecondsFormat::Secs, true),
            meta.len(),
            entry.file_name().to_string_lossy()
        ));
    }
    Ok(out)
}

/// Renders type and permission bits as `drwxr-xr-x`, with the setuid (`u`),
/// setgid (`g`) and sticky (`t`) markers among the leading type letters.
fn mode_string(meta: &Metadata) -> String {
    let ft = meta.file_type();
    let mode = meta.permissions().mode();
    let markers = [
        (ft.is_dir(), 'd'),
        (ft.is_symlink(), 'L'),
        (ft.is_block_device() || ft.is_char_device(), 'D'),
        (ft.is_fifo(), 'p'),
        (ft.is_socket(), 'S'),
        (mode & 0o4000 != 0, 'u'),
        (mode & 0o2000 != 0, 'g'),
        (ft.is_char_device(), 'c'),
        (mode & 0o1000 != 0, 't'),
    ];
    let mut s: String = markers
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, ch)| *ch)
        .collect();
    if s.is_empty() {
        s.push('-');
    }
    for (bit, ch) in [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ] {
        s.push(if mode & bit != 0 { ch } else { '-' });
    }
    s
}

pub fn process_table(source: &dyn ProcessSource) -> std::io::Result<String> {
    let mut out = format!("{:<20} {:<7}  {:<7}  {}\n", "USERNAME", "PID", "PPID", "CMDLINE");
    for p in source.processes()? {
        out.push_str(&format!(
            "{:<20} {:<7}  {:<7}  {}\n",
            p.user, p.pid, p.ppid, p.cmdline
        ));
    }
    Ok(out)
}

/// Runs the binary to completion and returns everything it wrote to stdout
/// and stderr, in the order it was written.
///
/// There is no timeout: the caller is blocked for the lifetime of the child.
pub async fn exec_foreground(line: &CommandLine) -> std::io::Result<String> {
    info!("Executing {} in foreground", line.program);
    let (reader, writer) = output_pipe()?;
    // The command owns the parent's copies of the write end; dropping it
    // right after spawn leaves the child as the only writer.
    let mut child = {
        let mut command = Command::new(&line.program);
        command
            .args(&line.args)
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        command.spawn()?
    };

    let mut output = Vec::new();
    tokio::fs::File::from_std(std::fs::File::from(reader))
        .read_to_end(&mut output)
        .await?;
    let status = child.wait().await?;

    let mut text = String::from_utf8_lossy(&output).into_owned();
    if !status.success() {
        text.push_str(&format!("{}\n", status));
    }
    debug!("{} finished with {}", line.program, status);
    Ok(text)
}

/// One pipe shared by stdout and stderr. Both ends are close-on-exec so only
/// the stdio slots of the child inherit it.
fn output_pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let (reader, writer) = nix::unistd::pipe()?;
    for fd in [&reader, &writer] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((reader, writer))
}

pub fn exec_background(line: &CommandLine) -> std::io::Result<String> {
    info!("Executing {} in background", line.program);
    // Dropping the handle leaves the child running; tokio reaps it.
    let _child = Command::new(&line.program)
        .args(&line.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(BACKGROUND_STARTED.to_string())
}

pub async fn download(path: &Path) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

/// Creates or truncates `dest` with `contents`.
pub async fn upload(dest: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(dest, contents).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ProcessEntry;
    use std::time::{Duration, SystemTime};

    struct FixedTable(Vec<ProcessEntry>);

    impl ProcessSource for FixedTable {
        fn processes(&self) -> std::io::Result<Vec<ProcessEntry>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn ls_reports_size_and_rfc3339_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, vec![b'a'; 1234]).unwrap();
        // 2023-11-14T22:13:20Z
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        let out = list_directory(dir.path()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);
        let line = lines[0];
        assert!(line.starts_with("-rw"), "unexpected mode in {line:?}");
        assert!(line.contains("2023-11-14T22:13:20Z"));
        assert!(line.contains(" 1234 "));
        assert!(line.trim_end().ends_with("report.txt"));
    }

    #[test]
    fn ls_marks_directories_and_sorts_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b_dir")).unwrap();
        std::fs::write(dir.path().join("a_file"), b"x").unwrap();
        let out = list_directory(dir.path()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].trim_end().ends_with("a_file"));
        assert!(lines[1].starts_with('d'));
        assert!(lines[1].trim_end().ends_with("b_dir"));
    }

    #[test]
    fn ls_on_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_directory(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn mode_string_renders_permission_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o754)).unwrap();
        let meta = std::fs::symlink_metadata(&path).unwrap();
        assert_eq!(mode_string(&meta), "-rwxr-xr--");
    }

    #[test]
    fn mode_string_shows_sticky_and_setuid_markers() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        std::fs::create_dir(&shared).unwrap();
        std::fs::set_permissions(&shared, std::fs::Permissions::from_mode(0o1777)).unwrap();
        let meta = std::fs::symlink_metadata(&shared).unwrap();
        assert_eq!(mode_string(&meta), "dtrwxrwxrwx");

        let tool = dir.path().join("tool");
        std::fs::write(&tool, b"").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o4755)).unwrap();
        let meta = std::fs::symlink_metadata(&tool).unwrap();
        assert_eq!(mode_string(&meta), "urwxr-xr-x");
    }

    #[test]
    fn process_table_has_header_first() {
        let source = FixedTable(vec![ProcessEntry {
            pid: 1,
            ppid: "0".into(),
            user: "root".into(),
            cmdline: "/sbin/init".into(),
        }]);
        let out = process_table(&source).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("USERNAME"));
        assert!(lines[0].ends_with("CMDLINE"));
        assert_eq!(lines[1], format!("{:<20} {:<7}  {:<7}  {}", "root", 1, "0", "/sbin/init"));
    }

    #[tokio::test]
    async fn exec_foreground_captures_stdout_and_stderr() {
        let line = CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), "echo out; echo err 1>&2".into()],
        };
        let out = exec_foreground(&line).await.unwrap();
        assert_eq!(out, "out\nerr\n");
    }

    #[tokio::test]
    async fn exec_foreground_keeps_write_order_across_streams() {
        let line = CommandLine {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "echo first-err 1>&2; sleep 0.1; echo second-out; echo third-err 1>&2".into(),
            ],
        };
        let out = exec_foreground(&line).await.unwrap();
        assert_eq!(out, "first-err\nsecond-out\nthird-err\n");
    }

    #[tokio::test]
    async fn exec_foreground_appends_failed_status() {
        let line = CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), "echo partial; exit 3".into()],
        };
        let out = exec_foreground(&line).await.unwrap();
        assert!(out.starts_with("partial\n"));
        assert!(out.contains("exit status: 3"), "got {out:?}");
    }

    #[tokio::test]
    async fn exec_missing_binary_is_an_error() {
        let line = CommandLine::parse("/definitely/not/a/binary --flag").unwrap();
        assert!(exec_foreground(&line).await.is_err());
        assert!(exec_background(&line).is_err());
    }

    #[tokio::test]
    async fn exec_background_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let line = CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), format!("touch {}", marker.display())],
        };
        assert_eq!(exec_background(&line).unwrap(), BACKGROUND_STARTED);
        for _ in 0..50 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background child never ran");
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blob.bin");
        let contents: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        upload(&dest, &contents).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), contents);
        assert_eq!(download(&dest).await.unwrap(), contents);

        upload(&dest, b"short").await.unwrap();
        assert_eq!(download(&dest).await.unwrap(), b"short");
    }
}
