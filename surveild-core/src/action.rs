//! The node action pipeline (§4.7): render a quiescent node's generated shell script and hand it
//! to the configured [`Executor`].

use std::path::Path;

use crate::node::ReasonCode;

/// Render the generated action script for a single quiescent file.
///
/// ```text
/// #!/bin/bash
/// FILE='<absolute path>'
/// REASON='<reason string>'
/// <action template, verbatim>
/// ```
pub fn render_script(absolute_path: &Path, reason: ReasonCode, exec_template: &str) -> String {
    format!(
        "#!/bin/bash\nFILE='{}'\nREASON='{}'\n{}\n",
        shell_single_quote(absolute_path.to_string_lossy().as_ref()),
        reason.as_script_text(),
        exec_template
    )
}

/// Escape a value for interpolation inside single quotes: `'` becomes `'\''`.
fn shell_single_quote(value: &str) -> String {
    value.replace('\'', r"'\''")
}

/// Outcome of running a generated action script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure,
}

/// Abstraction over "run this script and tell me if it worked", so the event loop's data model
/// never touches the mechanics of process execution (per the design note in §9: the executor is a
/// separate task/process communicating purely through a channel of outcomes).
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, script_path: &Path) -> crate::error::Result<ActionOutcome>;
}

/// Runs the generated script via `/bin/bash <path>` in its own child process.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

#[async_trait::async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, script_path: &Path) -> crate::error::Result<ActionOutcome> {
        let status = tokio::process::Command::new("/bin/bash")
            .arg(script_path)
            .status()
            .await?;

        Ok(if status.success() {
            ActionOutcome::Success
        } else {
            ActionOutcome::Failure
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_preamble_and_template() {
        let script = render_script(Path::new("/w/a.txt"), ReasonCode::FirstSeen, "echo hi");
        let mut lines = script.lines();
        assert_eq!(lines.next(), Some("#!/bin/bash"));
        assert_eq!(lines.next(), Some("FILE='/w/a.txt'"));
        assert_eq!(lines.next(), Some("REASON='is new'"));
        assert_eq!(lines.next(), Some("echo hi"));
    }

    #[test]
    fn escapes_embedded_single_quotes() {
        let script = render_script(Path::new("/w/it's.txt"), ReasonCode::Modified, "");
        assert!(script.contains(r"FILE='/w/it'\''s.txt'"));
    }

    #[tokio::test]
    async fn process_executor_reports_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok_script = dir.path().join("ok.sh");
        std::fs::write(&ok_script, "#!/bin/bash\nexit 0\n").unwrap();
        std::fs::set_permissions(&ok_script, std::os::unix::fs::PermissionsExt::from_mode(0o700)).unwrap();

        let executor = ProcessExecutor;
        let outcome = executor.execute(&ok_script).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Success);

        let fail_script = dir.path().join("fail.sh");
        std::fs::write(&fail_script, "#!/bin/bash\nexit 1\n").unwrap();
        let outcome = executor.execute(&fail_script).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Failure);
    }
}
