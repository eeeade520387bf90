//! Workspace-mode input validation and subprocess plumbing.
//!
//! Everything here runs before or around an external process that will
//! see attacker-influenced strings, so validation is strict: decode
//! percent-escapes first, then check the decoded form.

use regex::Regex;
use std::sync::OnceLock;

/// Validation failures for workspace inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The repository URL is not acceptable.
    #[error("invalid repository url: {0}")]
    RepoUrl(String),

    /// The branch name is not acceptable.
    #[error("invalid branch name: {0}")]
    Branch(String),

    /// The run identifier used in branch names is not acceptable.
    #[error("invalid run identifier: {0}")]
    RunHandle(String),
}

fn branch_charset() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9/_.\-]+$").expect("static regex"))
}

fn run_handle_charset() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("static regex"))
}

/// Decode percent-escaped sequences so checks see the effective string.
/// Malformed escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(high), Some(low)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((high * 16 + low) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Validate a repository URL for workspace mode.
///
/// Accepted forms: `https://…`, `ssh://…`, and scp-like `git@host:path`.
/// Anything starting with `-` is rejected before it can reach a git
/// argument list; escapes are decoded before the checks.
pub fn validate_repo_url(url: &str) -> Result<(), ValidationError> {
    let decoded = percent_decode(url.trim());
    if decoded.is_empty() || decoded.starts_with('-') {
        return Err(ValidationError::RepoUrl(url.to_owned()));
    }
    if decoded.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::RepoUrl(url.to_owned()));
    }
    let scheme_ok = decoded.starts_with("https://")
        || decoded.starts_with("ssh://")
        || is_scp_like(&decoded);
    if !scheme_ok {
        return Err(ValidationError::RepoUrl(url.to_owned()));
    }
    Ok(())
}

/// `git@host:path` — the scp-like syntax git accepts without a scheme.
fn is_scp_like(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("git@") else {
        return false;
    };
    match rest.split_once(':') {
        Some((host, path)) => {
            !host.is_empty()
                && !path.is_empty()
                && !path.starts_with('-')
                && host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
        }
        None => false,
    }
}

/// Validate a branch name: allowed charset, no leading `-` or `.`, no
/// `..` anywhere, no `.lock` suffix.
pub fn validate_branch(name: &str) -> Result<(), ValidationError> {
    let decoded = percent_decode(name.trim());
    let ok = !decoded.is_empty()
        && branch_charset().is_match(&decoded)
        && !decoded.starts_with('-')
        && !decoded.starts_with('.')
        && !decoded.contains("..")
        && !decoded.ends_with(".lock");
    if ok {
        Ok(())
    } else {
        Err(ValidationError::Branch(name.to_owned()))
    }
}

/// Validate the run identifier embedded in generated branch names.
pub fn validate_run_handle(handle: &str) -> Result<(), ValidationError> {
    if run_handle_charset().is_match(handle) {
        Ok(())
    } else {
        Err(ValidationError::RunHandle(handle.to_owned()))
    }
}

/// The per-run branch a workspace worker creates after cloning.
pub fn work_branch(run_handle: &str) -> Result<String, ValidationError> {
    validate_run_handle(run_handle)?;
    let branch = format!("axon/run-{run_handle}");
    validate_branch(&branch)?;
    Ok(branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_and_ssh_and_scp_urls_pass() {
        assert!(validate_repo_url("https://github.com/acme/infra.git").is_ok());
        assert!(validate_repo_url("ssh://git@github.com/acme/infra.git").is_ok());
        assert!(validate_repo_url("git@github.com:acme/infra.git").is_ok());
    }

    #[test]
    fn leading_dash_is_rejected_even_when_encoded() {
        assert!(validate_repo_url("-oProxyCommand=evil").is_err());
        assert!(validate_repo_url("%2DoProxyCommand=evil").is_err());
        assert!(validate_repo_url("git@host:-flag").is_err());
    }

    #[test]
    fn odd_schemes_and_whitespace_are_rejected() {
        assert!(validate_repo_url("file:///etc").is_err());
        assert!(validate_repo_url("http://insecure.example").is_err());
        assert!(validate_repo_url("https://host/a b").is_err());
        assert!(validate_repo_url("").is_err());
    }

    #[test]
    fn branch_names_follow_git_rules() {
        assert!(validate_branch("feature/disk-report").is_ok());
        assert!(validate_branch("axon/run-abc123").is_ok());
        assert!(validate_branch("../etc/passwd").is_err());
        assert!(validate_branch("-upstream").is_err());
        assert!(validate_branch(".hidden").is_err());
        assert!(validate_branch("refs..tricks").is_err());
        assert!(validate_branch("topic.lock").is_err());
        assert!(validate_branch("%2e%2e/escape").is_err());
    }

    #[test]
    fn run_handles_are_narrow() {
        assert!(validate_run_handle("run_01HXYZ").is_ok());
        assert!(validate_run_handle("../sneaky").is_err());
        assert!(validate_run_handle("a b").is_err());
        assert_eq!(work_branch("abc-123").unwrap(), "axon/run-abc-123");
    }
}
