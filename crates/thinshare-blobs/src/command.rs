//! Running helper programs on cluster nodes

use async_trait::async_trait;
use thinshare_common::{Error, NodeName, Result};
use tokio::process::Command;
use tracing::debug;

/// Runs a program on a named node and returns its stdout
#[async_trait]
pub trait NodeCommand: Send + Sync {
    async fn run(&self, node: &NodeName, program: &str, args: &[String]) -> Result<String>;
}

/// Runs programs locally, or through a remote shell for other nodes
pub struct ShellCommand {
    local_node: NodeName,
    remote_shell: Vec<String>,
}

impl ShellCommand {
    /// Create a runner for `local_node`.
    ///
    /// `remote_shell` is the command prefix used to reach other nodes; the
    /// node name is appended to it, followed by the program and its args.
    pub fn new(local_node: NodeName, remote_shell: Vec<String>) -> Result<Self> {
        if remote_shell.is_empty() {
            return Err(Error::Configuration("remote shell must not be empty".into()));
        }
        Ok(Self {
            local_node,
            remote_shell,
        })
    }

    fn build(&self, node: &NodeName, program: &str, args: &[String]) -> Command {
        if node == &self.local_node {
            let mut cmd = Command::new(program);
            cmd.args(args);
            return cmd;
        }

        let mut cmd = Command::new(&self.remote_shell[0]);
        cmd.args(&self.remote_shell[1..])
            .arg(node.as_str())
            .arg(program)
            .args(args);
        cmd
    }
}

#[async_trait]
impl NodeCommand for ShellCommand {
    async fn run(&self, node: &NodeName, program: &str, args: &[String]) -> Result<String> {
        let rendered = format!("{program} {}", args.join(" "));
        debug!("Running `{}` on {}", rendered, node);

        let output = self
            .build(node, program, args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::command(node.as_str(), &rendered, format!("failed to spawn: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::command(
                node.as_str(),
                &rendered,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_empty_remote_shell_rejected() {
        let result = ShellCommand::new("node-a".into(), Vec::new());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_remote_command_prefix() {
        let shell =
            ShellCommand::new("node-a".into(), args(&["ssh", "-o", "BatchMode=yes"])).unwrap();
        let cmd = shell.build(&"node-b".into(), "/usr/libexec/lvm.sh", &args(&["activate"]));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "ssh");
        let rendered: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy()).collect();
        assert_eq!(
            rendered,
            vec!["-o", "BatchMode=yes", "node-b", "/usr/libexec/lvm.sh", "activate"]
        );
    }

    #[test]
    fn test_local_command_runs_directly() {
        let shell = ShellCommand::new("node-a".into(), args(&["ssh"])).unwrap();
        let cmd = shell.build(&"node-a".into(), "lvs", &args(&["--noheadings"]));
        assert_eq!(cmd.as_std().get_program(), "lvs");
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_failures() {
        let shell = ShellCommand::new("node-a".into(), args(&["ssh"])).unwrap();
        let node = NodeName::from("node-a");

        let out = shell.run(&node, "echo", &args(&["hello"])).await.unwrap();
        assert_eq!(out.trim(), "hello");

        let err = shell
            .run(&node, "sh", &args(&["-c", "exit 3"]))
            .await
            .unwrap_err();
        match err {
            Error::Command { node, command, .. } => {
                assert_eq!(node, "node-a");
                assert_eq!(command, "sh -c exit 3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
