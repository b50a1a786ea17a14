use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{BeanckupError, Result};

/// The external archive program, resolved via PATH.
pub const ARCHIVER: &str = "7z";

/// A progress signal parsed out of the archiver's verbose output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageProgress {
    pub percentage: u32,
    pub current_file: Option<String>,
}

/// Everything needed to produce one package.
pub struct CreateRequest<'a> {
    pub delivery_dir: &'a Path,
    pub package_name: &'a str,
    pub workspace_root: &'a Path,
    /// Workspace-relative, forward-slash paths; includes the manifest file.
    pub files: &'a [String],
    pub password: Option<&'a str>,
    pub compression_level: u8,
    /// `Some` when the archive must be split into volumes of this size.
    pub volume_size_mb: Option<u32>,
}

/// Create `<delivery>/<package>` (plus volume parts when splitting) from a
/// listfile of workspace-relative paths. The archiver runs with its working
/// directory pinned to the workspace root so in-archive paths match the
/// reference strings recorded in manifests. On failure, partial output is
/// deleted before the error is reported.
pub fn create_package(
    req: &CreateRequest<'_>,
    progress: &mut dyn FnMut(&PackageProgress),
) -> Result<PathBuf> {
    std::fs::create_dir_all(req.delivery_dir)?;
    let delivery_abs = std::fs::canonicalize(req.delivery_dir)?;
    let out_path = delivery_abs.join(req.package_name);

    let scratch = tempfile::tempdir()?;
    let listfile_path = scratch.path().join("listfile.txt");
    let mut listfile = std::fs::File::create(&listfile_path)?;
    for rel in req.files {
        writeln!(listfile, "{rel}")?;
    }
    drop(listfile);

    let mut cmd = Command::new(ARCHIVER);
    cmd.arg("a")
        .arg(&out_path)
        .arg(format!("@{}", listfile_path.display()))
        .arg(format!("-w{}", req.workspace_root.display()))
        .arg(format!("-mx={}", req.compression_level))
        .arg("-mmt=on")
        .arg("-bb3")
        .arg("-bsp1")
        .arg("-bso1");
    if let Some(mb) = req.volume_size_mb {
        cmd.arg(format!("-v{mb}m"));
    }
    if let Some(password) = req.password.filter(|p| !p.is_empty()) {
        cmd.arg(format!("-p{password}"));
        cmd.arg("-mhe=on");
    }
    cmd.current_dir(req.workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(package = req.package_name, files = req.files.len(), "invoking archiver");
    let mut child = cmd.spawn().map_err(|e| {
        BeanckupError::Subprocess(format!("could not start '{ARCHIVER}': {e}"))
    })?;

    // Drain stderr on its own thread so a chatty archiver cannot deadlock
    // against our stdout reads.
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stderr_thread = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let stdout = child.stdout.take().expect("stdout piped");
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    while read_console_line(&mut reader, &mut line)? {
        let text = String::from_utf8_lossy(&line);
        if let Some(update) = parse_progress_line(&text) {
            progress(&update);
        }
    }

    let status = child.wait()?;
    let stderr_bytes = stderr_thread.join().unwrap_or_default();

    if !status.success() {
        remove_package_output(&delivery_abs, req.package_name);
        let detail = String::from_utf8_lossy(&stderr_bytes);
        return Err(BeanckupError::Subprocess(format!(
            "'{ARCHIVER} a' exited with {status}: {}",
            detail.trim()
        )));
    }

    Ok(out_path)
}

/// Extract a set of in-archive paths into `dest`, overwriting existing files.
pub fn extract_files(
    package: &Path,
    members: &[String],
    dest: &Path,
    password: Option<&str>,
) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    let scratch = tempfile::tempdir()?;
    let listfile_path = scratch.path().join("listfile.txt");
    let mut listfile = std::fs::File::create(&listfile_path)?;
    for member in members {
        writeln!(listfile, "{member}")?;
    }
    drop(listfile);

    let mut cmd = Command::new(ARCHIVER);
    cmd.arg("x")
        .arg(package)
        .arg(format!("-o{}", dest.display()))
        .arg(format!("@{}", listfile_path.display()))
        .arg("-aoa");
    push_password(&mut cmd, password);

    run_silent(cmd, package)
}

/// Extract a single member into `dest`.
pub fn extract_member(
    package: &Path,
    member: &str,
    dest: &Path,
    password: Option<&str>,
) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    let mut cmd = Command::new(ARCHIVER);
    cmd.arg("x")
        .arg(package)
        .arg(format!("-o{}", dest.display()))
        .arg(member)
        .arg("-y");
    push_password(&mut cmd, password);

    run_silent(cmd, package)
}

fn push_password(cmd: &mut Command, password: Option<&str>) {
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        cmd.arg(format!("-p{password}"));
    } else {
        // Prevent interactive password prompts on encrypted archives.
        cmd.arg("-p");
    }
}

fn run_silent(mut cmd: Command, package: &Path) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| BeanckupError::Subprocess(format!("could not start '{ARCHIVER}': {e}")))?;

    if !output.status.success() {
        let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if detail.is_empty() {
            detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        return Err(BeanckupError::Subprocess(format!(
            "'{ARCHIVER} x' failed for {}: {detail}",
            package.display()
        )));
    }
    Ok(())
}

/// Delete a package file and any volume parts it may have left behind.
pub fn remove_package_output(delivery_dir: &Path, package_name: &str) {
    let target = delivery_dir.join(package_name);
    if target.exists() {
        if let Err(e) = std::fs::remove_file(&target) {
            warn!(file = %target.display(), error = %e, "could not remove partial package");
        }
    }

    let volume_prefix = format!("{package_name}.0");
    let Ok(entries) = std::fs::read_dir(delivery_dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&volume_prefix) {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(file = %name, error = %e, "could not remove partial volume");
            }
        }
    }
}

/// Read one console line, terminated by `\r` or `\n` (the archiver redraws
/// progress with bare carriage returns). Returns `false` at end of stream.
fn read_console_line(reader: &mut impl BufRead, line: &mut Vec<u8>) -> Result<bool> {
    line.clear();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(!line.is_empty());
        }
        match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(pos) => {
                line.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);
                return Ok(true);
            }
            None => {
                let len = buf.len();
                line.extend_from_slice(buf);
                reader.consume(len);
            }
        }
    }
}

fn current_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)[UA]\s+(.+)$").expect("static regex"))
}

/// Pull a percentage and the file currently being packed out of one line of
/// archiver output. Lines that carry neither signal yield `None`; a parse
/// miss is never an error.
pub fn parse_progress_line(line: &str) -> Option<PackageProgress> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let percentage = trimmed.split_whitespace().find_map(|token| {
        token
            .strip_suffix('%')
            .and_then(|digits| digits.parse::<u32>().ok())
    })?;

    let current_file = current_file_re()
        .captures(trimmed)
        .map(|caps| caps[1].trim().to_string());

    Some(PackageProgress {
        percentage,
        current_file,
    })
}
