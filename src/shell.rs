//! Operator shell - A line-oriented front end over [`AppState`]
//!
//! Each line is one command; each reply is one line of JSON.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

use crate::core::{
    AppState, DisplayMode, InstanceId, InstanceKind, InstanceRequest, LifecycleError,
    ResourceRequest,
};

pub const HELP: &str = "\
commands:
  create <vm|container> <os> <memory_mb> <cpus> <runtime> [disk_gb] [--headless] [--seed <iso>]
  list | list-all | show <id>
  stop <id> | start <id> | delete <id> | reinstall <id>
  check | reconcile | help | quit
runtime accepts plain seconds or a 30s / 5m / 2h suffix";

/// One shell line. The first word is the command; there is no program name.
#[derive(Debug, Parser)]
#[command(
    name = "leasebox",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_help_flag = true
)]
struct ShellLine {
    #[command(subcommand)]
    command: Command,
}

/// A parsed shell command
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Provision a VM or container
    Create(CreateArgs),

    /// List running instances
    List,

    /// List every instance, whatever its status
    ListAll,

    /// Show one instance
    Show { id: InstanceId },

    Stop { id: InstanceId },

    /// Restart a stopped container
    Start { id: InstanceId },

    Delete { id: InstanceId },

    /// Replace an instance with a fresh one built from the same request
    Reinstall { id: InstanceId },

    /// Run one expiry pass now
    Check,

    /// Mark instances whose process or container vanished
    Reconcile,

    Help,

    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CreateArgs {
    /// `vm` or `container`
    pub kind: InstanceKind,

    pub os: String,

    pub memory_mb: u32,

    pub cpus: u32,

    /// Allotted runtime, e.g. `90`, `30s`, `5m`, `2h`
    #[arg(value_parser = parse_runtime)]
    pub runtime: Duration,

    /// Requested disk size; 0 means unspecified
    pub disk_gb: Option<u32>,

    /// Run the VM without a display
    #[arg(long)]
    pub headless: bool,

    /// Cloud-init seed ISO for the VM
    #[arg(long = "seed", value_name = "ISO")]
    pub seed_iso: Option<PathBuf>,
}

impl CreateArgs {
    pub fn into_request(self) -> InstanceRequest {
        let resources = ResourceRequest {
            memory_mb: self.memory_mb,
            cpu_count: self.cpus,
            disk_gb: self.disk_gb.filter(|gb| *gb > 0),
        };
        match self.kind {
            InstanceKind::Vm => {
                let display = if self.headless {
                    DisplayMode::Headless
                } else {
                    DisplayMode::Graphical
                };
                let request =
                    InstanceRequest::vm(self.os, resources, self.runtime).with_display(display);
                match self.seed_iso {
                    Some(seed) => request.with_seed_iso(seed),
                    None => request,
                }
            }
            InstanceKind::Container => InstanceRequest::container(self.os, resources, self.runtime),
        }
    }
}

/// Parse one line of operator input
pub fn parse_line(line: &str) -> Result<Command, clap::Error> {
    ShellLine::try_parse_from(line.split_whitespace()).map(|parsed| parsed.command)
}

/// Parse `90`, `90s`, `5m` or `2h`
pub fn parse_runtime(raw: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid runtime `{raw}`, expected e.g. 90, 30s, 5m or 2h");
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => raw.split_at(split),
        None => (raw, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = match unit {
        "s" => Some(value),
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3600),
        _ => None,
    };
    secs.map(Duration::from_secs).ok_or_else(invalid)
}

fn error_json(err: &LifecycleError) -> Value {
    json!({ "error": err.code(), "message": err.to_string() })
}

fn reply<T: serde::Serialize>(result: Result<T, LifecycleError>) -> Value {
    match result {
        Ok(value) => json!({ "ok": value }),
        Err(e) => error_json(&e),
    }
}

/// Run one command against the state and render the reply
pub async fn execute(state: &AppState, command: Command) -> Value {
    match command {
        Command::Create(args) => reply(state.create(&args.into_request()).await),
        Command::List => json!({ "ok": state.list_running() }),
        Command::ListAll => json!({ "ok": state.list_all() }),
        Command::Show { id } => reply(state.get(id)),
        Command::Stop { id } => reply(state.stop(id).await),
        Command::Start { id } => reply(state.start(id).await),
        Command::Delete { id } => reply(state.delete(id).await),
        Command::Reinstall { id } => reply(state.reinstall(id).await),
        Command::Check => json!({ "ok": state.check_expired().await }),
        Command::Reconcile => json!({ "ok": state.reconcile().await }),
        Command::Help => json!({ "ok": HELP }),
        Command::Quit => json!({ "ok": "bye" }),
    }
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;
    use crate::core::testing::Harness;
    use crate::core::LaunchOptions;

    fn create(line: &str) -> InstanceRequest {
        match parse_line(line).unwrap() {
            Command::Create(args) => args.into_request(),
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn shell_grammar_is_valid() {
        use clap::CommandFactory;
        ShellLine::command().debug_assert();
    }

    #[test]
    fn parses_container_create() {
        let request = create("create container Ubuntu 512 1 5m");
        assert_eq!(request.kind(), InstanceKind::Container);
        assert_eq!(request.os_choice, "Ubuntu");
        assert_eq!(request.resources.memory_mb, 512);
        assert_eq!(request.allotted_runtime, Duration::from_secs(300));
        assert_eq!(request.resources.disk_gb, None);
    }

    #[test]
    fn parses_vm_create_with_options() {
        let request = create("create vm CentOS 2048 2 1h 50 --headless --seed /tmp/seed.iso");
        assert_eq!(request.resources.disk_gb, Some(50));
        assert_eq!(request.allotted_runtime, Duration::from_secs(3600));
        assert_eq!(
            request.launch,
            LaunchOptions::Vm {
                display: DisplayMode::Headless,
                seed_iso: Some(PathBuf::from("/tmp/seed.iso")),
            }
        );
    }

    #[test]
    fn zero_disk_means_unspecified() {
        assert_eq!(create("create vm Ubuntu 512 1 60 0").resources.disk_gb, None);
    }

    #[test]
    fn parses_id_commands_and_aliases() {
        let id = InstanceId::new();
        assert_eq!(
            parse_line(&format!("reinstall {id}")).unwrap(),
            Command::Reinstall { id }
        );
        assert_eq!(parse_line("list-all").unwrap(), Command::ListAll);
        assert_eq!(parse_line("exit").unwrap(), Command::Quit);
        assert_eq!(parse_line("help").unwrap(), Command::Help);
    }

    #[test]
    fn rejects_bad_input() {
        let kind = |line: &str| parse_line(line).unwrap_err().kind();

        assert_eq!(kind("launch"), ErrorKind::InvalidSubcommand);
        assert_eq!(kind("stop"), ErrorKind::MissingRequiredArgument);
        assert_eq!(kind("stop not-a-uuid"), ErrorKind::ValueValidation);
        assert_eq!(kind("create box Ubuntu 512 1 60"), ErrorKind::ValueValidation);
        assert_eq!(kind("create vm Ubuntu 512 1 5d"), ErrorKind::ValueValidation);
        assert_eq!(kind("create vm Ubuntu 512 1 60 --seed"), ErrorKind::InvalidValue);
    }

    #[test]
    fn runtime_units() {
        assert_eq!(parse_runtime("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_runtime("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_runtime("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_runtime("m").is_err());
        assert!(parse_runtime("1d").is_err());
    }

    #[tokio::test]
    async fn execute_renders_snapshots_and_errors() {
        let h = Harness::new();

        let created = execute(&h.state, parse_line("create container Ubuntu 512 1 60").unwrap()).await;
        assert_eq!(created["ok"]["status"], "running");
        assert_eq!(created["ok"]["backing"]["kind"], "container");

        let id: InstanceId = created["ok"]["id"].as_str().unwrap().parse().unwrap();
        let started = execute(&h.state, Command::Start { id }).await;
        assert_eq!(started["ok"]["status"], "running");

        let unsupported =
            execute(&h.state, parse_line("create container Windows 512 1 60").unwrap()).await;
        assert_eq!(unsupported["error"], "unsupported_os");

        let deleted = execute(&h.state, Command::Delete { id }).await;
        assert_eq!(deleted["ok"]["status"], "deleted");
        let again = execute(&h.state, Command::Delete { id }).await;
        assert_eq!(again["error"], "not_found");
    }
}
