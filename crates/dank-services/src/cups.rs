//! CUPS print manager driven through the CUPS command-line tools.
//!
//! Printer and job state come from `lpstat`; actions use `cupsdisable`,
//! `cupsenable` and `cancel`. The manager polls while it exists. The server
//! creates it on the first `cups` subscriber and closes it after the last.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dank_protocol::{HandlerError, HandlerResult, Methods, Params, Services};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::params::{int_param, str_param};
use crate::{Manager, ManagerError, Subscribers};

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Runs one external command and returns its stdout.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl std::future::Future<Output = Result<String, ManagerError>> + Send;
}

/// Runs the real CUPS binaries with a C locale so output is parseable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommands;

impl CommandRunner for SystemCommands {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, ManagerError> {
        debug!("{program} {}", args.join(" "));
        let command = format!("{program} {}", args.join(" "));

        let output = tokio::process::Command::new(program)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ManagerError::Command {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ManagerError::Command {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub printer: String,
    pub user: String,
    pub size: i64,
    pub state: String,
    pub time_created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Printer {
    pub name: String,
    pub uri: String,
    pub state: String,
    pub state_reason: String,
    pub accepting: bool,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CupsState {
    pub printers: BTreeMap<String, Printer>,
}

// ─────────────────────────────────────────────────────────────────────────────
// lpstat parsing
// ─────────────────────────────────────────────────────────────────────────────

/// `lpstat -p`: one header line per printer, optionally followed by an
/// indented reason line.
fn parse_printers(output: &str) -> (BTreeMap<String, Printer>, BTreeMap<String, String>) {
    let mut printers: BTreeMap<String, Printer> = BTreeMap::new();
    let mut printing: BTreeMap<String, String> = BTreeMap::new();
    let mut last: Option<String> = None;

    for line in output.lines() {
        if line.starts_with(char::is_whitespace) {
            let reason = line.trim();
            if let Some(printer) = last.as_ref().and_then(|name| printers.get_mut(name)) {
                if !reason.is_empty() {
                    printer.state_reason = reason.to_string();
                }
            }
            continue;
        }

        let Some(rest) = line.strip_prefix("printer ") else {
            last = None;
            continue;
        };
        let Some((name, status)) = rest.split_once(' ') else { continue };

        let state = if status.starts_with("is idle") {
            "idle"
        } else if let Some(job) = status.strip_prefix("now printing ") {
            if let Some(job) = job.split_whitespace().next() {
                printing.insert(name.to_string(), job.trim_end_matches('.').to_string());
            }
            "processing"
        } else if status.starts_with("disabled") {
            "stopped"
        } else {
            "unknown"
        };

        printers.insert(
            name.to_string(),
            Printer {
                name: name.to_string(),
                uri: String::new(),
                state: state.to_string(),
                state_reason: "none".to_string(),
                accepting: false,
                jobs: Vec::new(),
            },
        );
        last = Some(name.to_string());
    }
    (printers, printing)
}

/// `lpstat -a`: `<name> accepting requests since ...` or `<name> not accepting ...`.
fn parse_accepting(output: &str) -> BTreeMap<String, bool> {
    output
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(|line| line.split_once(' '))
        .map(|(name, rest)| (name.to_string(), rest.starts_with("accepting")))
        .collect()
}

/// `lpstat -v`: `device for <name>: <uri>`.
fn parse_devices(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("device for "))
        .filter_map(|rest| rest.split_once(": "))
        .map(|(name, uri)| (name.to_string(), uri.trim().to_string()))
        .collect()
}

/// `lpstat -o`: `<printer>-<id> <user> <size> <date...>`.
fn parse_jobs(output: &str) -> Vec<Job> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let (printer, id) = fields.next()?.rsplit_once('-')?;
            let id = id.parse().ok()?;
            let user = fields.next()?.to_string();
            let size = fields.next()?.parse().ok()?;
            let time_created = fields.collect::<Vec<_>>().join(" ");
            Some(Job {
                id,
                printer: printer.to_string(),
                user,
                size,
                state: "pending".to_string(),
                time_created,
            })
        })
        .collect()
}

fn build_state(printers: &str, accepting: &str, devices: &str, jobs: &str) -> CupsState {
    let (mut printers, printing) = parse_printers(printers);
    let accepting = parse_accepting(accepting);
    let devices = parse_devices(devices);

    for (name, printer) in printers.iter_mut() {
        printer.accepting = accepting.get(name).copied().unwrap_or(false);
        printer.uri = devices.get(name).cloned().unwrap_or_default();
    }
    for mut job in parse_jobs(jobs) {
        let Some(printer) = printers.get_mut(&job.printer) else { continue };
        if printing.get(&job.printer) == Some(&format!("{}-{}", job.printer, job.id)) {
            job.state = "processing".to_string();
        }
        printer.jobs.push(job);
    }
    CupsState { printers }
}

async fn fetch_state<R: CommandRunner>(runner: &R) -> Result<CupsState, ManagerError> {
    let printers = match runner.run("lpstat", &["-p"]).await {
        Ok(out) => out,
        Err(ManagerError::Command { message, .. }) if message.contains("No destinations") => String::new(),
        Err(e) => return Err(e),
    };
    // Secondary listings fail when there are no printers or no jobs.
    let accepting = runner.run("lpstat", &["-a"]).await.unwrap_or_default();
    let devices = runner.run("lpstat", &["-v"]).await.unwrap_or_default();
    let jobs = runner.run("lpstat", &["-o"]).await.unwrap_or_default();
    Ok(build_state(&printers, &accepting, &devices, &jobs))
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

pub struct CupsManager<R = SystemCommands> {
    runner: R,
    state: RwLock<CupsState>,
    subscribers: Subscribers<Value>,
    stop: watch::Sender<bool>,
}

impl<R: CommandRunner> CupsManager<R> {
    /// Query CUPS once and start polling. Fails if `lpstat` cannot run.
    pub async fn start(runner: R, interval: Duration) -> Result<Arc<Self>, ManagerError> {
        let state = fetch_state(&runner).await?;
        debug!("CUPS manager found {} printer(s)", state.printers.len());

        let (stop, stop_rx) = watch::channel(false);
        let manager = Arc::new(Self {
            runner,
            state: RwLock::new(state),
            subscribers: Subscribers::new(),
            stop,
        });
        tokio::spawn(poll_loop(Arc::downgrade(&manager), interval, stop_rx));
        Ok(manager)
    }

    pub fn snapshot(&self) -> CupsState {
        self.state.read().clone()
    }

    /// Fetch fresh state and push it if it changed.
    async fn reload(&self) -> Result<(), ManagerError> {
        let new_state = fetch_state(&self.runner).await?;
        {
            let mut state = self.state.write();
            if *state == new_state {
                return Ok(());
            }
            *state = new_state;
        }
        self.subscribers.notify(self.state());
        Ok(())
    }

    async fn run_action(&self, what: &str, program: &str, args: &[&str]) -> Result<(), HandlerError> {
        self.runner
            .run(program, args)
            .await
            .map_err(|e| HandlerError::context(what, e))?;
        if let Err(e) = self.reload().await {
            debug!("CUPS refresh after {what} failed: {e}");
        }
        Ok(())
    }
}

async fn poll_loop<R: CommandRunner>(
    manager: Weak<CupsManager<R>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
        let Some(manager) = manager.upgrade() else { break };
        if let Err(e) = manager.reload().await {
            debug!("CUPS poll failed: {e}");
        }
    }
    debug!("CUPS poller stopped");
}

/// `printerName`, refused when the CUPS tools would read it as an option.
fn printer_param(params: &Params) -> Result<&str, HandlerError> {
    let name = str_param(params, "printerName")?;
    if name.starts_with('-') {
        return Err(HandlerError::invalid_param("printerName"));
    }
    Ok(name)
}

fn success(message: &str) -> Value {
    json!({ "success": true, "message": message })
}

impl<R: CommandRunner> Manager for CupsManager<R> {
    fn capability(&self) -> &'static str {
        Services::CUPS
    }

    async fn handle(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            Methods::CUPS_GET_PRINTERS => {
                self.reload().await.map_err(|e| HandlerError::context("get printers", e))?;
                let printers: Vec<Printer> = self.snapshot().printers.into_values().collect();
                serde_json::to_value(printers).map_err(|e| HandlerError::context("encode printers", e))
            }
            Methods::CUPS_GET_JOBS => {
                let name = str_param(&params, "printerName")?;
                self.reload().await.map_err(|e| HandlerError::context("get jobs", e))?;
                let jobs = self
                    .snapshot()
                    .printers
                    .remove(name)
                    .map(|p| p.jobs)
                    .ok_or_else(|| HandlerError::failed(format!("printer not found: {name}")))?;
                serde_json::to_value(jobs).map_err(|e| HandlerError::context("encode jobs", e))
            }
            Methods::CUPS_PAUSE_PRINTER => {
                let name = printer_param(&params)?;
                self.run_action("pause printer", "cupsdisable", &[name]).await?;
                Ok(success("paused"))
            }
            Methods::CUPS_RESUME_PRINTER => {
                let name = printer_param(&params)?;
                self.run_action("resume printer", "cupsenable", &[name]).await?;
                Ok(success("resumed"))
            }
            Methods::CUPS_CANCEL_JOB => {
                let job_id = int_param(&params, "jobID")?;
                let target = match params.get("printerName") {
                    Some(_) => format!("{}-{job_id}", printer_param(&params)?),
                    None => job_id.to_string(),
                };
                self.run_action("cancel job", "cancel", &[target.as_str()]).await?;
                Ok(success("job canceled"))
            }
            Methods::CUPS_PURGE_JOBS => {
                let name = printer_param(&params)?;
                self.run_action("purge jobs", "cancel", &["-a", name]).await?;
                Ok(success("jobs canceled"))
            }
            _ => Err(HandlerError::unknown_method(method)),
        }
    }

    fn state(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    fn subscribe(&self, id: &str) -> broadcast::Receiver<Value> {
        self.subscribers.subscribe(id)
    }

    fn unsubscribe(&self, id: &str) {
        self.subscribers.unsubscribe(id);
    }

    async fn close(&self) {
        self.stop.send_replace(true);
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const LPSTAT_P: &str = "\
printer Brother_HL is idle.  enabled since Tue 02 Jan 2024 09:00:00 AM
printer Office now printing Office-12.  enabled since Tue 02 Jan 2024 09:00:00 AM
printer Old-Laser disabled since Tue 02 Jan 2024 09:00:00 AM -
\tPaused by admin
";
    const LPSTAT_A: &str = "\
Brother_HL accepting requests since Tue 02 Jan 2024 09:00:00 AM
Office accepting requests since Tue 02 Jan 2024 09:00:00 AM
Old-Laser not accepting requests since Tue 02 Jan 2024 09:00:00 AM -
\tRejecting Jobs
";
    const LPSTAT_V: &str = "\
device for Brother_HL: usb://Brother/HL-L2350DW?serial=E123
device for Office: ipp://office.local/ipp/print
device for Old-Laser: socket://10.0.0.9
";
    const LPSTAT_O: &str = "\
Office-12               alice           1024   Tue 02 Jan 2024 09:01:00 AM
Office-13               bob             2048   Tue 02 Jan 2024 09:02:00 AM
Old-Laser-7             carol           512    Tue 02 Jan 2024 08:00:00 AM
";

    /// Canned command outputs keyed by the full command line.
    #[derive(Default)]
    struct FakeCommands {
        outputs: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCommands {
        fn standard() -> Self {
            let fake = Self::default();
            fake.set("lpstat -p", LPSTAT_P);
            fake.set("lpstat -a", LPSTAT_A);
            fake.set("lpstat -v", LPSTAT_V);
            fake.set("lpstat -o", LPSTAT_O);
            fake
        }

        fn set(&self, command: &str, output: &str) {
            self.outputs.lock().insert(command.to_string(), output.to_string());
        }
    }

    impl CommandRunner for Arc<FakeCommands> {
        async fn run(&self, program: &str, args: &[&str]) -> Result<String, ManagerError> {
            let command = format!("{program} {}", args.join(" "));
            self.calls.lock().push(command.clone());
            match self.outputs.lock().get(&command) {
                Some(out) => Ok(out.clone()),
                None if program == "lpstat" => Err(ManagerError::Command {
                    command,
                    message: "no output".into(),
                }),
                None => Ok(String::new()),
            }
        }
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn builds_printers_from_lpstat() {
        let state = build_state(LPSTAT_P, LPSTAT_A, LPSTAT_V, LPSTAT_O);

        let brother = &state.printers["Brother_HL"];
        assert_eq!(brother.state, "idle");
        assert_eq!(brother.state_reason, "none");
        assert!(brother.accepting);
        assert_eq!(brother.uri, "usb://Brother/HL-L2350DW?serial=E123");
        assert!(brother.jobs.is_empty());

        let office = &state.printers["Office"];
        assert_eq!(office.state, "processing");
        assert_eq!(office.jobs.len(), 2);
        assert_eq!(office.jobs[0].state, "processing");
        assert_eq!(office.jobs[1].state, "pending");
        assert_eq!(office.jobs[1].user, "bob");
        assert_eq!(office.jobs[1].size, 2048);

        let old = &state.printers["Old-Laser"];
        assert_eq!(old.state, "stopped");
        assert_eq!(old.state_reason, "Paused by admin");
        assert!(!old.accepting);
        assert_eq!(old.jobs[0].id, 7);
        assert_eq!(old.jobs[0].time_created, "Tue 02 Jan 2024 08:00:00 AM");
    }

    #[test]
    fn empty_output_means_no_printers() {
        assert!(build_state("", "", "", "").printers.is_empty());
    }

    #[tokio::test]
    async fn start_fails_without_lpstat() {
        let fake = Arc::new(FakeCommands::default());
        assert!(CupsManager::start(fake, POLL_INTERVAL).await.is_err());
    }

    #[tokio::test]
    async fn actions_run_cups_tools() {
        let fake = Arc::new(FakeCommands::standard());
        let manager = CupsManager::start(fake.clone(), Duration::from_secs(3600)).await.unwrap();

        let result = manager
            .handle(Methods::CUPS_PAUSE_PRINTER, params(json!({"printerName": "Office"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"success": true, "message": "paused"}));

        manager
            .handle(Methods::CUPS_CANCEL_JOB, params(json!({"printerName": "Office", "jobID": 13})))
            .await
            .unwrap();
        manager
            .handle(Methods::CUPS_PURGE_JOBS, params(json!({"printerName": "Old-Laser"})))
            .await
            .unwrap();

        let calls = fake.calls.lock().clone();
        assert!(calls.contains(&"cupsdisable Office".to_string()));
        assert!(calls.contains(&"cancel Office-13".to_string()));
        assert!(calls.contains(&"cancel -a Old-Laser".to_string()));
    }

    #[tokio::test]
    async fn option_like_printer_names_are_refused() {
        let fake = Arc::new(FakeCommands::standard());
        let manager = CupsManager::start(fake.clone(), Duration::from_secs(3600)).await.unwrap();

        for (method, extra) in [
            (Methods::CUPS_PAUSE_PRINTER, json!({})),
            (Methods::CUPS_RESUME_PRINTER, json!({})),
            (Methods::CUPS_PURGE_JOBS, json!({})),
            (Methods::CUPS_CANCEL_JOB, json!({"jobID": 3})),
        ] {
            let mut p = params(extra);
            p.insert("printerName".into(), json!("-a"));
            let err = manager.handle(method, p).await.unwrap_err();
            assert_eq!(err.to_string(), "missing or invalid printerName parameter", "{method}");
        }

        let calls = fake.calls.lock().clone();
        assert!(calls.iter().all(|c| c.starts_with("lpstat")), "{calls:?}");
    }

    #[tokio::test]
    async fn get_jobs_requires_known_printer() {
        let fake = Arc::new(FakeCommands::standard());
        let manager = CupsManager::start(fake, Duration::from_secs(3600)).await.unwrap();

        let jobs = manager
            .handle(Methods::CUPS_GET_JOBS, params(json!({"printerName": "Office"})))
            .await
            .unwrap();
        assert_eq!(jobs.as_array().unwrap().len(), 2);

        let err = manager
            .handle(Methods::CUPS_GET_JOBS, params(json!({"printerName": "Nope"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "printer not found: Nope");

        let err = manager.handle(Methods::CUPS_GET_JOBS, Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "missing or invalid printerName parameter");
    }

    #[tokio::test]
    async fn poll_pushes_changes() {
        let fake = Arc::new(FakeCommands::standard());
        let manager = CupsManager::start(fake.clone(), Duration::from_millis(20)).await.unwrap();
        let mut rx = manager.subscribe("t");

        fake.set("lpstat -o", "");

        let state = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["printers"]["Office"]["jobs"], json!([]));
        manager.close().await;
    }
}
