use std::fs;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;

use vmbench::adapter::Backend;
use vmbench::config::Config;
use vmbench::counters::{CounterSource, ProcCounters};
use vmbench::error::ToolError;
use vmbench::process;
use vmbench::secrets::{EnvSecrets, SecretProvider, SecretScope};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

fn probe_args(backend: Backend) -> &'static [&'static str] {
    match backend {
        Backend::Esxi => &["version"],
        Backend::Virtualbox => &["--version"],
        // vmrun HAS NO --version; BARE INVOCATION PRINTS USAGE
        Backend::Workstation => &[],
        Backend::Hyperv => &["-NoProfile", "-NonInteractive", "-Command", "$PSVersionTable.PSVersion.ToString()"],
    }
}

// PRESENT MEANS IT LAUNCHED. vmrun EXITS NON-ZERO ON A BARE CALL, SO
// THE EXIT STATUS IS NOT CHECKED.
fn check_tool(config: &Config, backend: Backend) -> bool {
    let tool = match config.adapter_settings(backend) {
        Ok(s) => s.tool,
        Err(e) => {
            println!("  {:<24}CONFIG ERROR: {}", backend.id(), e);
            return false;
        }
    };
    let mut cmd = Command::new(&tool);
    cmd.args(probe_args(backend));
    match process::run(cmd, PROBE_TIMEOUT) {
        Ok(out) => {
            let first = out
                .stdout
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .trim()
                .to_string();
            println!("  {:<24}OK ({}) {}", backend.id(), tool.display(), first);
            true
        }
        Err(ToolError::Launch { .. }) => {
            println!("  {:<24}MISSING ({})", backend.id(), tool.display());
            false
        }
        Err(e) => {
            println!("  {:<24}BROKEN: {}", backend.id(), e);
            false
        }
    }
}

fn check_credentials(backend: Backend) -> bool {
    let mut scopes = vec![SecretScope::Guest];
    if backend == Backend::Esxi {
        scopes.push(SecretScope::Host);
    }
    let mut ok = true;
    for scope in scopes {
        let (user_var, _) = EnvSecrets::var_names(backend, scope);
        match EnvSecrets.credentials(backend, scope) {
            Ok(_) => println!("  {:<38}SET", user_var.trim_end_matches("_USER")),
            Err(e) => {
                println!("  {:<38}NOT SET ({})", user_var.trim_end_matches("_USER"), e);
                ok = false;
            }
        }
    }
    ok
}

fn check_counters() -> bool {
    let reading = ProcCounters::host().and_then(|mut c| {
        c.read()?;
        c.read()
    });
    match reading {
        Ok(r) => {
            println!(
                "  /proc                 OK (cpu {:.1}%, memory {:.1}%)",
                r.cpu_percent, r.memory_percent
            );
            true
        }
        Err(e) => {
            println!("  /proc                 FAILED: {}", e);
            false
        }
    }
}

fn check_data_dir(config: &Config) -> bool {
    let dir = &config.data_dir;
    let probe = dir.join(".vmbench-check");
    let result = fs::create_dir_all(dir)
        .and_then(|()| fs::write(&probe, b"ok"))
        .and_then(|()| fs::remove_file(&probe));
    match result {
        Ok(()) => {
            println!("  {:<22}WRITABLE", dir.display());
            true
        }
        Err(e) => {
            println!("  {:<22}NOT WRITABLE: {}", dir.display(), e);
            false
        }
    }
}

// TOOLS AND CREDENTIALS ARE PER BACKEND: A HOST USUALLY HAS ONLY SOME OF
// THEM, SO THOSE ARE REPORTED BUT ONLY /proc AND THE DATA DIR GATE THE RESULT.
pub fn run_check(config: &Config) -> Result<bool> {
    println!("VMBENCH DEPENDENCY CHECK");
    println!();

    println!("CONTROL TOOLS:");
    let mut usable = Vec::new();
    for backend in Backend::ALL {
        if check_tool(config, backend) {
            usable.push(backend);
        }
    }
    println!();

    println!("CREDENTIALS:");
    for &backend in &usable {
        check_credentials(backend);
    }
    if usable.is_empty() {
        println!("  (NO CONTROL TOOL FOUND, SKIPPED)");
    }
    println!();

    println!("HOST:");
    let mut ok = check_counters();
    ok &= check_data_dir(config);
    println!();

    if usable.is_empty() {
        ok = false;
    }
    if ok {
        println!("ALL CHECKS PASSED ({} BACKEND(S) USABLE)", usable.len());
    } else {
        println!("SOME CHECKS FAILED");
    }
    Ok(ok)
}
