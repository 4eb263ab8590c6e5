use eyre::{
    Result,
    WrapErr,
};
use std::path::Path;
use tracing::instrument;

#[allow(unused_imports)]
use tracing::{
    debug,
    info,
    warn,
};

use crate::error::DeployError;

/// drops the trailing line breaks and any carriage return left inside
fn normalize_line_endings(text: &str) -> String {
    text.trim_end_matches(|c: char| c == '\r' || c == '\n').replace('\r', "")
}

#[cfg(target_os = "windows")]
fn decode_console(bytes: &[u8]) -> Result<String> {
    use encoding::Encoding;
    encoding::all::WINDOWS_1252
        .decode(bytes, encoding::DecoderTrap::Ignore)
        .map_err(|e| eyre::eyre!("console output is not windows-1252 :: {e}"))
}

#[cfg(not(target_os = "windows"))]
fn decode_console(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .wrap_err("console output is not utf-8")
}

/// stdout/stderr of a child process as text, with unix line endings
pub fn decode_command_output(bytes: &[u8]) -> Result<String> {
    decode_console(bytes).map(|text| normalize_line_endings(&text))
}

/// full hash of the checked out commit, used as the target of release tags
#[instrument(ret, level = "debug")]
pub fn commit_hash() -> Result<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .wrap_err("failed to read git hash")?;
    let hash = decode_command_output(&output.stdout)?.trim().to_string();
    if !output.status.success() || hash.is_empty() {
        return Err(DeployError::MissingInput("git commit hash".to_string()).into());
    }
    Ok(hash)
}

/// runs an external tool in `cwd`, failing when it exits non-zero
#[instrument(skip(cwd), fields(cwd = %cwd.as_ref().display()))]
pub fn run_command<T: AsRef<Path>>(program: &str, args: &[&str], cwd: T) -> Result<String> {
    let output = std::process::Command::new(program)
        .args(args)
        .current_dir(cwd.as_ref())
        .output()
        .wrap_err(format!("running {program}"))?;
    let stdout = decode_command_output(&output.stdout)?;
    if !output.status.success() {
        let stderr = decode_command_output(&output.stderr).unwrap_or_default();
        return Err(DeployError::remote(
            program,
            output.status.code().map(|c| c as u16),
            stderr,
        )
        .into());
    }
    debug!("{program} :: {stdout}");
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trailing_newlines_are_dropped() {
        assert_eq!(normalize_line_endings("abc\r\n"), "abc");
        assert_eq!(normalize_line_endings("abc\n\r\n\n"), "abc");
        assert_eq!(normalize_line_endings("a\r\nb\n"), "a\nb");
        assert_eq!(normalize_line_endings("\n\r"), "");
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn decodes_utf8_output() -> Result<()> {
        assert_eq!(decode_command_output("deadbeef\n".as_bytes())?, "deadbeef");
        assert!(decode_command_output(&[0xff, 0xfe]).is_err());
        Ok(())
    }

    #[test]
    fn failing_command_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = run_command("git", &["definitely-not-a-git-command"], dir.path());
        assert!(result.is_err());
    }
}
