//! Command-execution engine seam.
//!
//! The engine interprets command text and produces a human-readable reply
//! string; it never raises. Command semantics live outside this crate: the
//! default implementation shells out to a configured executor binary. No
//! shell is used; arguments are passed as a list to avoid injection.

use crate::config::ExecutorConfig;
use std::process::Command;

/// Platform discriminator the engine receives with every command.
pub const PLATFORM_LARK: &str = "lark";

/// One command invocation: the text plus the cluster flags the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command text with any bot-mention prefix already stripped.
    pub text: String,
    pub kubectl_enabled: bool,
    pub restrict_access: bool,
    pub default_namespace: String,
    pub cluster_name: String,
    /// Which integration issued the command (always "lark" here).
    pub platform: &'static str,
    /// Whether the platform can render rich formatting in the reply.
    pub rich_formatting: bool,
}

/// Executes one command synchronously and returns the reply text. Errors are
/// reported as readable reply strings, not as error values.
pub trait CommandEngine: Send + Sync {
    fn execute(&self, request: &CommandRequest) -> String;
}

/// Engine backed by an external executor binary from config. The request is
/// encoded as argv; stdout is the reply.
pub struct ProcessEngine {
    executor: ExecutorConfig,
}

impl ProcessEngine {
    pub fn new(executor: ExecutorConfig) -> Self {
        Self { executor }
    }

    /// Encode a request as the executor's argv: configured extra args first,
    /// then the cluster flags, then the command text.
    fn argv(&self, request: &CommandRequest) -> Vec<String> {
        let mut args = self.executor.args.clone();
        args.push(format!("--platform={}", request.platform));
        args.push(format!("--cluster-name={}", request.cluster_name));
        args.push(format!("--default-namespace={}", request.default_namespace));
        args.push(format!("--allow-kubectl={}", request.kubectl_enabled));
        args.push(format!("--restrict-access={}", request.restrict_access));
        args.push(format!("--rich-formatting={}", request.rich_formatting));
        args.push(request.text.clone());
        args
    }
}

impl CommandEngine for ProcessEngine {
    fn execute(&self, request: &CommandRequest) -> String {
        let Some(ref command) = self.executor.command else {
            return "Command execution is not configured for this bot. \
                    Set executor.command in the config."
                .to_string();
        };
        let output = match Command::new(command).args(self.argv(request)).output() {
            Ok(output) => output,
            Err(e) => {
                log::warn!("executor spawn failed: {}", e);
                return format!("Failed to run the command executor: {}", e);
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            stdout
        } else {
            log::warn!("executor exited with {}", output.status);
            let mut msg = stdout;
            if !stderr.is_empty() {
                if !msg.is_empty() {
                    msg.push('\n');
                }
                msg.push_str(&stderr);
            }
            format!("Command failed ({}): {}", output.status, msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(text: &str) -> CommandRequest {
        CommandRequest {
            text: text.to_string(),
            kubectl_enabled: true,
            restrict_access: false,
            default_namespace: "default".to_string(),
            cluster_name: "test-cluster".to_string(),
            platform: PLATFORM_LARK,
            rich_formatting: true,
        }
    }

    #[test]
    fn argv_encodes_flags_and_text_last() {
        let engine = ProcessEngine::new(ExecutorConfig {
            command: Some(PathBuf::from("/usr/local/bin/executor")),
            args: vec!["exec".to_string()],
        });
        let argv = engine.argv(&request("get pods"));
        assert_eq!(
            argv,
            vec![
                "exec",
                "--platform=lark",
                "--cluster-name=test-cluster",
                "--default-namespace=default",
                "--allow-kubectl=true",
                "--restrict-access=false",
                "--rich-formatting=true",
                "get pods",
            ]
        );
    }

    #[test]
    fn unconfigured_engine_replies_instead_of_failing() {
        let engine = ProcessEngine::new(ExecutorConfig::default());
        let reply = engine.execute(&request("get pods"));
        assert!(reply.contains("not configured"));
    }

    #[test]
    fn spawn_failure_becomes_readable_reply() {
        let engine = ProcessEngine::new(ExecutorConfig {
            command: Some(PathBuf::from("/nonexistent/executor-binary")),
            args: Vec::new(),
        });
        let reply = engine.execute(&request("get pods"));
        assert!(reply.contains("Failed to run the command executor"));
    }

    #[test]
    fn executor_stdout_is_the_reply() {
        let engine = ProcessEngine::new(ExecutorConfig {
            command: Some(PathBuf::from("echo")),
            args: Vec::new(),
        });
        let reply = engine.execute(&request("get pods"));
        assert!(reply.trim_end().ends_with("get pods"));
    }
}
