//! Live end-to-end probe against a running sidecar (C13).
//!
//! Spawns the sidecar binary as a child process, talks JSON-RPC over its
//! stdio, and asserts shape + exit code for a handful of read-only methods
//! plus the four static resource checks. Exits non-zero on any failure so
//! it can gate CI/packaging the same way the reference implementation's
//! `self_test.py` does.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

const PING_RETRIES: u32 = 3;
const PING_BACKOFF: Duration = Duration::from_millis(300);

struct SidecarRpcProcess {
    child: Child,
    stdin: std::process::ChildStdin,
    stdout: BufReader<std::process::ChildStdout>,
    next_id: u64,
}

impl SidecarRpcProcess {
    fn spawn() -> anyhow::Result<Self> {
        let command = std::env::var("DICTATE_SIDECAR_COMMAND")
            .or_else(|_| std::env::var("CARGO_BIN_EXE_dictate-sidecar"))
            .map_err(|_| anyhow::anyhow!("DICTATE_SIDECAR_COMMAND is not set"))?;

        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("DICTATE_SIDECAR_COMMAND is empty"))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        Ok(Self {
            child,
            stdin,
            stdout,
            next_id: 1,
        })
    }

    fn call(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()?;

        loop {
            let mut raw = String::new();
            let n = self.stdout.read_line(&mut raw)?;
            if n == 0 {
                anyhow::bail!("sidecar closed stdout before responding to {method}");
            }
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(raw)?;
            // Skip notifications (no "id") interleaved with the response we want.
            if value.get("id").is_none() {
                continue;
            }
            if value.get("id") != Some(&Value::from(id)) {
                continue;
            }
            return Ok(value);
        }
    }

    fn shutdown(mut self) -> anyhow::Result<std::process::ExitStatus> {
        self.call("system.shutdown", json!({}))?;
        drop(self.stdin);
        Ok(self.child.wait()?)
    }
}

fn ping_with_retry(proc: &mut SidecarRpcProcess) -> anyhow::Result<Value> {
    let mut last_err = None;
    for attempt in 0..PING_RETRIES {
        match proc.call("system.ping", json!({})) {
            Ok(response) if response.get("result").is_some() => return Ok(response),
            Ok(response) => last_err = Some(anyhow::anyhow!("ping returned error: {response}")),
            Err(e) => last_err = Some(e),
        }
        if attempt + 1 < PING_RETRIES {
            std::thread::sleep(PING_BACKOFF * (attempt + 1));
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("ping failed with no error recorded")))
}

fn expect_result<'a>(response: &'a Value, method: &str) -> anyhow::Result<&'a Value> {
    response
        .get("result")
        .ok_or_else(|| anyhow::anyhow!("{method} returned an error: {response}"))
}

fn check_resource_paths(info: &Value) -> anyhow::Result<()> {
    let paths = info
        .get("resource_paths")
        .ok_or_else(|| anyhow::anyhow!("system.info missing resource_paths"))?;
    for key in ["presets", "model_manifest", "model_catalog", "contracts_dir"] {
        let value = paths.get(key);
        match value {
            Some(Value::String(s)) if !s.is_empty() => {}
            other => anyhow::bail!("resource_paths.{key} did not resolve: {other:?}"),
        }
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let timeout_s: u64 = std::env::var("DICTATE_SELF_TEST_TIMEOUT_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    let deadline = Instant::now() + Duration::from_secs(timeout_s);

    let mut proc = SidecarRpcProcess::spawn()?;

    let ping = ping_with_retry(&mut proc)?;
    let ping_result = expect_result(&ping, "system.ping")?;
    anyhow::ensure!(
        ping_result.get("version").is_some(),
        "system.ping result missing version"
    );
    println!("ok  system.ping");

    let info = proc.call("system.info", json!({}))?;
    let info_result = expect_result(&info, "system.info")?;
    anyhow::ensure!(
        info_result.get("protocol") == Some(&Value::String("v1".into())),
        "system.info protocol mismatch"
    );
    check_resource_paths(info_result)?;
    println!("ok  system.info (resource paths resolve)");

    if Instant::now() > deadline {
        anyhow::bail!("self-test exceeded timeout of {timeout_s}s");
    }

    let status = proc.call("status.get", json!({}))?;
    let status_result = expect_result(&status, "status.get")?;
    anyhow::ensure!(
        status_result.get("state").is_some(),
        "status.get missing state"
    );
    println!("ok  status.get");

    let rules = proc.call("replacements.get_rules", json!({}))?;
    let rules_result = expect_result(&rules, "replacements.get_rules")?;
    anyhow::ensure!(
        rules_result.get("rules").and_then(Value::as_array).is_some(),
        "replacements.get_rules did not return an array"
    );
    println!("ok  replacements.get_rules");

    let status = proc.shutdown()?;
    anyhow::ensure!(status.success(), "sidecar exited non-zero on shutdown: {status:?}");
    println!("ok  system.shutdown (clean exit)");

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("self-test FAILED: {e:#}");
        std::process::exit(1);
    }
    println!("self-test PASSED");
}
