//! Immutable process declarations and start ordering.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tp_config::{PipelineConfig, ProcessEntry, Protocol, RestartPolicy, Role};

/// Errors raised while building a plan or preparing to launch it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("process {0} is declared more than once")]
    DuplicateRole(Role),

    #[error("process {role} depends on {dependency}, which is not declared")]
    UnknownDependency { role: Role, dependency: Role },

    #[error("dependency cycle among: {}", join_roles(.roles))]
    DependencyCycle { roles: Vec<Role> },

    #[error("{protocol} port {port} required by {role} is unavailable: {reason}")]
    PortInUse {
        role: Role,
        port: u16,
        protocol: Protocol,
        reason: String,
    },
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(|r| r.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Program and arguments of a managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split an argv vector; `None` when it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(CommandLine::new(program.clone(), args.iter().cloned()))
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A port that must be free before the owning process starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn udp(port: u16) -> Self {
        PortBinding {
            port,
            protocol: Protocol::Udp,
        }
    }

    pub fn tcp(port: u16) -> Self {
        PortBinding {
            port,
            protocol: Protocol::Tcp,
        }
    }
}

/// Immutable declaration of one managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSpec {
    pub role: Role,
    pub command: CommandLine,
    pub depends_on: Vec<Role>,
    pub restart: RestartPolicy,
    pub binds: Vec<PortBinding>,
}

impl ProcessSpec {
    pub fn new(role: Role, command: CommandLine) -> Self {
        ProcessSpec {
            role,
            command,
            depends_on: role.default_dependencies().to_vec(),
            restart: RestartPolicy::Always,
            binds: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = Role>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_bind(mut self, bind: PortBinding) -> Self {
        self.binds.push(bind);
        self
    }
}

/// A validated set of process specs in start order.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessPlan {
    specs: Vec<ProcessSpec>,
}

impl ProcessPlan {
    /// Validate the specs and order them so dependencies come first.
    pub fn new(specs: Vec<ProcessSpec>) -> Result<Self, SupervisorError> {
        let mut by_role: BTreeMap<Role, ProcessSpec> = BTreeMap::new();
        for spec in specs {
            let role = spec.role;
            if by_role.insert(role, spec).is_some() {
                return Err(SupervisorError::DuplicateRole(role));
            }
        }
        for spec in by_role.values() {
            if let Some(&dependency) = spec.depends_on.iter().find(|d| !by_role.contains_key(*d)) {
                return Err(SupervisorError::UnknownDependency {
                    role: spec.role,
                    dependency,
                });
            }
        }

        let order = topological_order(&by_role)?;
        let specs = order
            .into_iter()
            .filter_map(|role| by_role.remove(&role))
            .collect();
        Ok(ProcessPlan { specs })
    }

    /// Build the deployment described by the configuration file.
    ///
    /// `receiver_program` is the executable providing the `receive`
    /// subcommand, normally the supervisor's own binary. `config_path` is
    /// handed to the receiver so it reads the same file as the supervisor.
    /// The run mode and every receiver setting are passed explicitly, so
    /// nothing the child resolves on its own can change them.
    pub fn from_config(
        config: &PipelineConfig,
        receiver_program: &Path,
        config_path: Option<&Path>,
    ) -> Result<Self, SupervisorError> {
        let bounded = config.supervisor.bounded;
        let receiver = &config.receiver;

        let mut args = vec![
            "receive".to_string(),
            "--bind".to_string(),
            receiver.bind.clone(),
            "--port".to_string(),
            receiver.port.to_string(),
            "--store".to_string(),
            receiver.store_path.to_string_lossy().into_owned(),
            "--max-datagram-bytes".to_string(),
            receiver.max_datagram_bytes.to_string(),
        ];
        args.push(if bounded { "--bounded" } else { "--open" }.to_string());
        if let Some(timeout_ms) = receiver.read_timeout_ms {
            args.push("--read-timeout-ms".to_string());
            args.push(timeout_ms.to_string());
        }
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        if receiver.fsync {
            args.push("--fsync".to_string());
        }

        let mut specs = vec![ProcessSpec::new(
            Role::Receiver,
            CommandLine::new(receiver_program.to_string_lossy(), args),
        )
        .with_restart(
            config
                .processes
                .receiver
                .restart
                .unwrap_or_else(|| default_restart(Role::Receiver, bounded)),
        )
        .with_bind(PortBinding::udp(receiver.port))];

        let processes = &config.processes;
        for (role, entry) in [
            (Role::Simulator, &processes.simulator),
            (Role::Visualizer, &processes.visualizer),
            (Role::Dashboard, &processes.dashboard),
        ] {
            if let Some(entry) = entry {
                if let Some(spec) = spec_from_entry(config, role, entry) {
                    specs.push(spec);
                }
            }
        }

        ProcessPlan::new(specs)
    }

    /// Specs in start order.
    pub fn specs(&self) -> &[ProcessSpec] {
        &self.specs
    }

    pub fn get(&self, role: Role) -> Option<&ProcessSpec> {
        self.specs.iter().find(|s| s.role == role)
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.specs.iter().map(|s| s.role)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Restart policy applied when the configuration names none.
///
/// In a bounded run the receiver and the simulator finish on their own and
/// stay down; everything else is kept alive.
pub fn default_restart(role: Role, bounded: bool) -> RestartPolicy {
    match role {
        Role::Receiver | Role::Simulator if bounded => RestartPolicy::Never,
        _ => RestartPolicy::Always,
    }
}

fn spec_from_entry(config: &PipelineConfig, role: Role, entry: &ProcessEntry) -> Option<ProcessSpec> {
    let argv: Vec<String> = entry
        .command
        .iter()
        .map(|arg| substitute(arg, config))
        .collect();
    let command = CommandLine::from_argv(&argv)?;

    let mut spec = ProcessSpec::new(role, command)
        .with_restart(
            entry
                .restart
                .unwrap_or_else(|| default_restart(role, config.supervisor.bounded)),
        );
    if let Some(deps) = &entry.depends_on {
        spec = spec.with_dependencies(deps.iter().copied());
    }
    if role == Role::Dashboard {
        spec = spec.with_bind(PortBinding::tcp(config.dashboard.port));
    }
    for bind in &entry.binds {
        spec = spec.with_bind(PortBinding {
            port: bind.port,
            protocol: bind.protocol,
        });
    }
    Some(spec)
}

fn substitute(arg: &str, config: &PipelineConfig) -> String {
    arg.replace("{receiver_port}", &config.receiver.port.to_string())
        .replace("{dashboard_port}", &config.dashboard.port.to_string())
}

/// Kahn's algorithm; among ready roles the lowest in role order goes first.
fn topological_order(specs: &BTreeMap<Role, ProcessSpec>) -> Result<Vec<Role>, SupervisorError> {
    let mut indegree: BTreeMap<Role, usize> = specs
        .iter()
        .map(|(role, spec)| {
            let unique: BTreeSet<Role> = spec.depends_on.iter().copied().collect();
            (*role, unique.len())
        })
        .collect();

    let mut ready: BTreeSet<Role> = indegree
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(role, _)| *role)
        .collect();
    let mut order = Vec::with_capacity(specs.len());

    while let Some(role) = ready.pop_first() {
        order.push(role);
        for (dependent, spec) in specs {
            if spec.depends_on.contains(&role) {
                if let Some(n) = indegree.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
    }

    if order.len() < specs.len() {
        let roles = specs
            .keys()
            .filter(|role| !order.contains(role))
            .copied()
            .collect();
        return Err(SupervisorError::DependencyCycle { roles });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(role: Role) -> ProcessSpec {
        ProcessSpec::new(role, CommandLine::new("true", Vec::<String>::new()))
    }

    #[test]
    fn dependencies_start_first() {
        let plan = ProcessPlan::new(vec![
            spec(Role::Dashboard),
            spec(Role::Simulator),
            spec(Role::Receiver),
            spec(Role::Visualizer),
        ])
        .unwrap();
        let order: Vec<Role> = plan.roles().collect();
        assert_eq!(
            order,
            vec![
                Role::Receiver,
                Role::Simulator,
                Role::Visualizer,
                Role::Dashboard
            ]
        );
    }

    #[test]
    fn chained_dependencies_override_role_order() {
        let plan = ProcessPlan::new(vec![
            spec(Role::Receiver),
            spec(Role::Simulator).with_dependencies([Role::Dashboard]),
            spec(Role::Dashboard),
        ])
        .unwrap();
        let order: Vec<Role> = plan.roles().collect();
        assert_eq!(order, vec![Role::Receiver, Role::Dashboard, Role::Simulator]);
    }

    #[test]
    fn duplicate_role_rejected() {
        let err = ProcessPlan::new(vec![spec(Role::Receiver), spec(Role::Receiver)]).unwrap_err();
        assert_eq!(err, SupervisorError::DuplicateRole(Role::Receiver));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let err = ProcessPlan::new(vec![spec(Role::Visualizer)]).unwrap_err();
        assert_eq!(
            err,
            SupervisorError::UnknownDependency {
                role: Role::Visualizer,
                dependency: Role::Receiver
            }
        );
    }

    #[test]
    fn cycle_rejected() {
        let err = ProcessPlan::new(vec![
            spec(Role::Receiver).with_dependencies([Role::Simulator]),
            spec(Role::Simulator),
            spec(Role::Dashboard),
        ])
        .unwrap_err();
        match err {
            SupervisorError::DependencyCycle { roles } => {
                assert_eq!(roles, vec![Role::Receiver, Role::Simulator, Role::Dashboard]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn default_restart_depends_on_run_mode() {
        assert_eq!(default_restart(Role::Receiver, true), RestartPolicy::Never);
        assert_eq!(default_restart(Role::Simulator, true), RestartPolicy::Never);
        assert_eq!(default_restart(Role::Visualizer, true), RestartPolicy::Always);
        assert_eq!(default_restart(Role::Receiver, false), RestartPolicy::Always);
    }

    #[test]
    fn from_config_builds_receiver_and_configured_roles() {
        let mut config = PipelineConfig::default();
        config.supervisor.bounded = true;
        config.processes.dashboard = Some(ProcessEntry::new([
            "streamlit",
            "run",
            "app.py",
            "--server.port",
            "{dashboard_port}",
        ]));
        config.processes.simulator = Some(ProcessEntry::new(["sim", "--port", "{receiver_port}"]));

        let plan =
            ProcessPlan::from_config(&config, &PathBuf::from("/usr/bin/tp-core"), None).unwrap();
        assert_eq!(plan.len(), 3);

        let receiver = plan.get(Role::Receiver).unwrap();
        assert_eq!(receiver.command.program, "/usr/bin/tp-core");
        assert_eq!(receiver.command.args[0], "receive");
        assert!(receiver.command.args.contains(&"--bounded".to_string()));
        assert!(!receiver.command.args.contains(&"--open".to_string()));
        assert!(!receiver.command.args.contains(&"--config".to_string()));
        assert_eq!(receiver.restart, RestartPolicy::Never);
        assert_eq!(receiver.binds, vec![PortBinding::udp(5555)]);

        let dashboard = plan.get(Role::Dashboard).unwrap();
        assert_eq!(dashboard.command.args.last().unwrap(), "8501");
        assert_eq!(dashboard.binds, vec![PortBinding::tcp(8501)]);
        assert_eq!(dashboard.restart, RestartPolicy::Always);
        assert_eq!(dashboard.depends_on, vec![Role::Receiver]);

        let simulator = plan.get(Role::Simulator).unwrap();
        assert_eq!(simulator.command.to_string(), "sim --port 5555");
        assert_eq!(simulator.restart, RestartPolicy::Never);
    }

    #[test]
    fn open_run_receiver_gets_explicit_open_flag() {
        let mut config = PipelineConfig::default();
        config.receiver.read_timeout_ms = Some(400);
        let plan = ProcessPlan::from_config(
            &config,
            Path::new("tp-core"),
            Some(Path::new("/etc/tp/open.json")),
        )
        .unwrap();
        let receiver = plan.get(Role::Receiver).unwrap();
        let args = receiver.command.args.join(" ");
        assert!(!args.contains("--bounded"));
        assert!(args.contains("--open"));
        assert!(args.contains("--read-timeout-ms 400"));
        assert!(args.contains("--config /etc/tp/open.json"));
        assert_eq!(receiver.restart, RestartPolicy::Always);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn configured_restart_overrides_default() {
        let mut config = PipelineConfig::default();
        let mut viz = ProcessEntry::new(["viz"]);
        viz.restart = Some(RestartPolicy::OnCrashOnly);
        config.processes.visualizer = Some(viz);

        let plan = ProcessPlan::from_config(&config, Path::new("tp-core"), None).unwrap();
        assert_eq!(
            plan.get(Role::Visualizer).unwrap().restart,
            RestartPolicy::OnCrashOnly
        );
    }
}
