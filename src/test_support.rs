//! Test support utilities shared across unit and integration tests.
//!
//! Provides a scripted command runner, an in-memory platform whose machines
//! never leave the process, and guards for environment mutation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::platform::{
    Cluster, Flight, Machine, Platform, PlatformError, PlatformFuture, RuntimeConfig, SshOutput,
};
use crate::registry::TestDescriptor;
use crate::ssh::{CommandOutput, CommandRunner, SshConfig, SshError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SshError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| SshError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// SSH settings matching the configuration defaults.
#[must_use]
pub fn ssh_config() -> SshConfig {
    SshConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        user: String::from("core"),
        batch_mode: None,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
        identity_file: None,
        connect_timeout_secs: 10,
    }
}

/// A test with no constraints whose body always passes.
///
/// # Panics
///
/// Panics when `name` is blank.
#[must_use]
pub fn passing_test(name: &str) -> TestDescriptor {
    TestDescriptor::builder(name, |_| async { Ok(()) })
        .build()
        .unwrap_or_else(|err| panic!("test descriptor {name}: {err}"))
}

/// os-release text reported by fake machines unless overridden.
pub const FAKE_OS_RELEASE: &str = "NAME=\"Container Linux\"\nID=flatcar\nVERSION_ID=4081.2.0\n";

/// Behaviour shared by every cluster and machine of a [`FakeFlight`].
#[derive(Clone, Debug)]
pub struct FakeBehaviour {
    /// Console text returned for every machine.
    pub console: String,
    /// Journal text returned for every machine.
    pub journal: String,
    /// Output of `cat /etc/os-release`.
    pub os_release: String,
    /// Fail every machine creation.
    pub fail_machine_creation: bool,
    /// Fail discovery URL allocation.
    pub fail_discovery: bool,
    /// Commands that exit non-zero.
    pub failing_commands: BTreeSet<String>,
}

impl Default for FakeBehaviour {
    fn default() -> Self {
        Self {
            console: String::new(),
            journal: String::new(),
            os_release: String::from(FAKE_OS_RELEASE),
            fail_machine_creation: false,
            fail_discovery: false,
            failing_commands: BTreeSet::new(),
        }
    }
}

/// Counters recording what a [`FakeFlight`] did.
#[derive(Debug, Default)]
pub struct FakeLedger {
    clusters_created: AtomicUsize,
    clusters_destroyed: AtomicUsize,
    machines_created: AtomicUsize,
    machines_destroyed: AtomicUsize,
    flight_destroyed: AtomicBool,
    commands: Mutex<Vec<(String, String)>>,
    user_data: Mutex<Vec<String>>,
    dropped_files: Mutex<Vec<Utf8PathBuf>>,
}

impl FakeLedger {
    /// Clusters created, including the version probe cluster.
    #[must_use]
    pub fn clusters_created(&self) -> usize {
        self.clusters_created.load(Ordering::SeqCst)
    }

    /// Clusters destroyed at least once.
    #[must_use]
    pub fn clusters_destroyed(&self) -> usize {
        self.clusters_destroyed.load(Ordering::SeqCst)
    }

    /// Machines created.
    #[must_use]
    pub fn machines_created(&self) -> usize {
        self.machines_created.load(Ordering::SeqCst)
    }

    /// Machines whose destruction took effect.
    #[must_use]
    pub fn machines_destroyed(&self) -> usize {
        self.machines_destroyed.load(Ordering::SeqCst)
    }

    /// Whether the flight was destroyed.
    #[must_use]
    pub fn flight_destroyed(&self) -> bool {
        self.flight_destroyed.load(Ordering::SeqCst)
    }

    /// Commands run, as `(machine id, command)` pairs.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, String)> {
        lock(&self.commands).clone()
    }

    /// User-data passed to each machine creation.
    #[must_use]
    pub fn user_data(&self) -> Vec<String> {
        lock(&self.user_data).clone()
    }

    /// Local files dropped onto clusters.
    #[must_use]
    pub fn dropped_files(&self) -> Vec<Utf8PathBuf> {
        lock(&self.dropped_files).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory flight for exercising the harness without a provider.
#[derive(Clone, Debug)]
pub struct FakeFlight {
    platform: Platform,
    behaviour: Arc<FakeBehaviour>,
    ledger: Arc<FakeLedger>,
}

impl FakeFlight {
    /// Creates a fake flight reporting `platform`.
    #[must_use]
    pub fn new(platform: Platform, behaviour: FakeBehaviour) -> Self {
        Self {
            platform,
            behaviour: Arc::new(behaviour),
            ledger: Arc::new(FakeLedger::default()),
        }
    }

    /// Shared record of the flight's activity.
    #[must_use]
    pub fn ledger(&self) -> Arc<FakeLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Flight for FakeFlight {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn new_cluster<'a>(
        &'a self,
        _config: &'a RuntimeConfig,
    ) -> PlatformFuture<'a, Arc<dyn Cluster>> {
        Box::pin(async move {
            let index = self.ledger.clusters_created.fetch_add(1, Ordering::SeqCst);
            let cluster: Arc<dyn Cluster> = Arc::new(FakeCluster {
                name: format!("fake-cluster-{index}"),
                behaviour: Arc::clone(&self.behaviour),
                ledger: Arc::clone(&self.ledger),
                machines: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            });
            Ok(cluster)
        })
    }

    fn destroy(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            self.ledger.flight_destroyed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Cluster created by [`FakeFlight`].
#[derive(Debug)]
pub struct FakeCluster {
    name: String,
    behaviour: Arc<FakeBehaviour>,
    ledger: Arc<FakeLedger>,
    machines: Mutex<Vec<Arc<FakeMachine>>>,
    destroyed: AtomicBool,
}

impl Cluster for FakeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_machine<'a>(&'a self, user_data: &'a str) -> PlatformFuture<'a, Arc<dyn Machine>> {
        Box::pin(async move {
            if self.behaviour.fail_machine_creation {
                return Err(PlatformError::Provider(String::from("simulated quota exhaustion")));
            }
            lock(&self.ledger.user_data).push(user_data.to_owned());
            let index = self.ledger.machines_created.fetch_add(1, Ordering::SeqCst);
            let octet = u8::try_from(index % 250).unwrap_or(0) + 1;
            let machine = Arc::new(FakeMachine {
                id: format!("{}-m{index}", self.name),
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet)),
                behaviour: Arc::clone(&self.behaviour),
                ledger: Arc::clone(&self.ledger),
                destroyed: AtomicBool::new(false),
            });
            lock(&self.machines).push(Arc::clone(&machine));
            let handle: Arc<dyn Machine> = machine;
            Ok(handle)
        })
    }

    fn machines(&self) -> Vec<Arc<dyn Machine>> {
        lock(&self.machines)
            .iter()
            .map(|machine| {
                let handle: Arc<dyn Machine> = Arc::<FakeMachine>::clone(machine);
                handle
            })
            .collect()
    }

    fn destroy(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            let machines = lock(&self.machines).clone();
            for machine in machines {
                machine.destroy().await?;
            }
            if !self.destroyed.swap(true, Ordering::SeqCst) {
                self.ledger.clusters_destroyed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }

    fn console_output(&self) -> PlatformFuture<'_, BTreeMap<String, String>> {
        Box::pin(async move { Ok(self.per_machine(&self.behaviour.console)) })
    }

    fn journal_output(&self) -> PlatformFuture<'_, BTreeMap<String, String>> {
        Box::pin(async move { Ok(self.per_machine(&self.behaviour.journal)) })
    }

    fn drop_file<'a>(&'a self, local: &'a Utf8Path) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.ledger.dropped_files).push(local.to_path_buf());
            Ok(())
        })
    }

    fn get_discovery_url(&self, size: usize) -> PlatformFuture<'_, String> {
        Box::pin(async move {
            if self.behaviour.fail_discovery {
                return Err(PlatformError::Discovery(String::from("connection refused")));
            }
            Ok(format!("https://discovery.invalid/{}/{size}", self.name))
        })
    }
}

impl FakeCluster {
    fn per_machine(&self, text: &str) -> BTreeMap<String, String> {
        lock(&self.machines)
            .iter()
            .map(|machine| (machine.id.clone(), text.to_owned()))
            .collect()
    }
}

/// Machine created by [`FakeCluster`].
#[derive(Debug)]
pub struct FakeMachine {
    id: String,
    ip: IpAddr,
    behaviour: Arc<FakeBehaviour>,
    ledger: Arc<FakeLedger>,
    destroyed: AtomicBool,
}

impl Machine for FakeMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn ip(&self) -> IpAddr {
        self.ip
    }

    fn ssh<'a>(&'a self, command: &'a str) -> PlatformFuture<'a, SshOutput> {
        Box::pin(async move {
            if self.destroyed.load(Ordering::SeqCst) {
                return Err(PlatformError::Ssh {
                    machine_id: self.id.clone(),
                    message: String::from("machine destroyed"),
                });
            }
            lock(&self.ledger.commands).push((self.id.clone(), command.to_owned()));
            if self.behaviour.failing_commands.contains(command) {
                return Ok(SshOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: format!("{command}: simulated failure"),
                });
            }
            let stdout = if command == "cat /etc/os-release" {
                self.behaviour.os_release.clone()
            } else {
                String::new()
            };
            Ok(SshOutput {
                exit_code: Some(0),
                stdout,
                stderr: String::new(),
            })
        })
    }

    fn reboot(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            lock(&self.ledger.commands).push((self.id.clone(), String::from("<reboot>")));
            Ok(())
        })
    }

    fn destroy(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            if !self.destroyed.swap(true, Ordering::SeqCst) {
                self.ledger.machines_destroyed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Produces a JSON array matching `scw instance server list -o json`.
///
/// Each entry is `(id, zone, creation_date, tags)`.
#[must_use]
pub fn json_servers(servers: &[(&str, &str, &str, &[&str])]) -> String {
    let items = servers
        .iter()
        .map(|(id, zone, created, tags)| {
            let tags_json = tags
                .iter()
                .map(|tag| format!("\"{tag}\""))
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "{{\"id\":\"{id}\",\"name\":\"sortie-{id}\",\"zone\":\"{zone}\",\"creation_date\":\"{created}\",\"tags\":[{tags_json}]}}"
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("[{items}]")
}
