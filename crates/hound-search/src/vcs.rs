//! Version-control capability consumed by the searcher supervisors.
//!
//! The core only needs one operation: bring a working copy up to date and
//! report the revision it landed on. Revisions are opaque tokens compared
//! for equality.

use std::error;
use std::fmt::{self, Display};
use std::path::Path;
use std::process::{Command, Stdio};

/// Per-poll failures, classified so the supervisor can count and log them.
#[derive(Debug)]
pub enum VcsError {
    Network(String),
    Auth(String),
    Other(String),
}

impl Display for VcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VcsError::Network(s) => write!(f, "network error: {}", s),
            VcsError::Auth(s) => write!(f, "auth error: {}", s),
            VcsError::Other(s) => write!(f, "vcs error: {}", s),
        }
    }
}

impl error::Error for VcsError {}

pub trait VcsDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create or update the working copy at `workdir` and return the
    /// revision it now sits at. Must be non-interactive and honor being run
    /// from a blocking worker.
    fn pull(&self, workdir: &Path) -> Result<String, VcsError>;
}

/// Select a driver by the repo's `vcs` string.
pub fn driver_for(vcs: &str, url: &str) -> Option<Box<dyn VcsDriver>> {
    match vcs {
        "git" => Some(Box::new(GitDriver {
            url: url.to_string(),
        })),
        _ => None,
    }
}

/// Driver shelling out to the git CLI, always non-interactive.
pub struct GitDriver {
    pub url: String,
}

impl VcsDriver for GitDriver {
    fn name(&self) -> &'static str {
        "git"
    }

    fn pull(&self, workdir: &Path) -> Result<String, VcsError> {
        if workdir.join(".git").is_dir() {
            self.run(
                workdir,
                &["fetch", "--force", "--depth", "1", "origin", "HEAD"],
            )?;
            self.run(workdir, &["reset", "--hard", "FETCH_HEAD"])?;
        } else {
            if let Some(parent) = workdir.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| VcsError::Other(format!("create workdir: {}", e)))?;
            }
            let dst = workdir.to_string_lossy();
            self.run(
                Path::new("."),
                &["clone", "--depth", "1", self.url.as_str(), dst.as_ref()],
            )?;
        }
        let head = self.run(workdir, &["rev-parse", "HEAD"])?;
        Ok(head.trim().to_string())
    }
}

impl GitDriver {
    fn run(&self, cwd: &Path, args: &[&str]) -> Result<String, VcsError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.url.starts_with("git@") || self.url.starts_with("ssh://") {
            cmd.env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");
        }
        let output = cmd
            .output()
            .map_err(|e| VcsError::Other(format!("failed to spawn git: {}", e)))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_stderr(stderr.trim()))
    }
}

/// Map git's stderr onto the error taxonomy.
fn classify_stderr(stderr: &str) -> VcsError {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("fatal: could not read")
    {
        VcsError::Auth(stderr.to_string())
    } else if lower.contains("could not resolve host")
        || lower.contains("unable to access")
        || lower.contains("connection timed out")
        || lower.contains("connection refused")
    {
        VcsError::Network(stderr.to_string())
    } else {
        VcsError::Other(stderr.to_string())
    }
}
