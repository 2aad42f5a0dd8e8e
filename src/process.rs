// VMBENCH CONTROL-TOOL RUNNER
// RUNS ONE govc / VBoxManage / vmrun / powershell INVOCATION UNDER A DEADLINE.
// THE CHILD GETS ITS OWN PROCESS GROUP: CTRL+C AT THE TERMINAL DOES NOT
// REACH IT, AND A TIMEOUT KILLS THE TOOL AND ANY HELPERS IT FORKED.
// HELPERS THAT OUTLIVE A SUCCESSFUL TOOL (vmware-vmx, VBoxSVC) MAY KEEP THE
// PIPES OPEN FOREVER, SO OUTPUT IS COLLECTED WITH A BOUNDED WAIT, NEVER A JOIN.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::ToolError;

const POLL: Duration = Duration::from_millis(20);
const TERM_GRACE: Duration = Duration::from_millis(500);
// HOW LONG THE PIPES MAY STAY OPEN AFTER THE TOOL ITSELF EXITED
const PIPE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

struct ProcGuard {
    child: Option<Child>,
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: i32,
}

impl ProcGuard {
    fn new(child: Child) -> Self {
        let pgid = child.id() as i32;
        Self {
            child: Some(child),
            pgid,
        }
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(c) => c.try_wait(),
            None => Ok(None),
        }
    }

    // SIGTERM THE GROUP, GIVE IT 500MS, THEN SIGKILL
    fn stop(&mut self) {
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return,
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        #[cfg(unix)]
        unsafe {
            libc::killpg(self.pgid, libc::SIGTERM);
        }
        let deadline = Instant::now() + TERM_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(_) => break,
            }
        }
        #[cfg(unix)]
        unsafe {
            libc::killpg(self.pgid, libc::SIGKILL);
        }
        let _ = child.kill();
        let _ = child.wait();
    }

    fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ProcGuard {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.stop();
        }
    }
}

// DRAIN A PIPE ON A HELPER THREAD SO A CHATTY TOOL CANNOT FILL IT AND STALL.
// BYTES LAND IN A SHARED BUFFER AS THEY ARRIVE; EOF IS SIGNALLED ON A CHANNEL.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    eof: Receiver<()>,
}

impl Drain {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, eof) = mpsc::channel();
        let sink = Arc::clone(&buf);
        std::thread::spawn(move || {
            if let Some(mut r) = pipe {
                let mut chunk = [0u8; 4096];
                loop {
                    match r.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => match sink.lock() {
                            Ok(mut b) => b.extend_from_slice(&chunk[..n]),
                            Err(_) => break,
                        },
                    }
                }
            }
            let _ = tx.send(());
        });
        Self { buf, eof }
    }

    // WAIT UP TO `wait` FOR EOF, THEN TAKE WHATEVER ARRIVED.
    // A PIPE STILL HELD BY A DETACHED HELPER IS ABANDONED TO ITS THREAD.
    fn collect(self, wait: Duration) -> String {
        let _ = self.eof.recv_timeout(wait);
        let text = match self.buf.lock() {
            Ok(b) => String::from_utf8_lossy(&b).into_owned(),
            Err(_) => String::new(),
        };
        text
    }
}

pub fn tool_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

pub fn run(mut cmd: Command, timeout: Duration) -> Result<ToolOutput, ToolError> {
    let tool = tool_name(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|source| ToolError::Launch {
        tool: tool.clone(),
        source,
    })?;
    let stdout = Drain::spawn(child.stdout.take());
    let stderr = Drain::spawn(child.stderr.take());
    let mut guard = ProcGuard::new(child);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match guard.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                // GUARD DROP KILLS THE GROUP; DRAIN THREADS EXIT WHEN THE PIPES CLOSE
                drop(guard);
                return Err(ToolError::Timeout { tool, timeout });
            }
            Ok(None) => std::thread::sleep(POLL),
            Err(source) => return Err(ToolError::Wait { tool, source }),
        }
    };
    guard.disarm();

    // BOTH PIPES SHARE ONE GRACE WINDOW, CAPPED BY WHAT IS LEFT OF THE TIMEOUT
    let left = deadline.saturating_duration_since(Instant::now());
    let grace_end = Instant::now() + PIPE_GRACE.min(left).max(POLL);
    let stdout = stdout.collect(grace_end.saturating_duration_since(Instant::now()));
    let stderr = stderr.collect(grace_end.saturating_duration_since(Instant::now()));
    Ok(ToolOutput {
        status,
        stdout,
        stderr,
    })
}

// RUN AND REQUIRE A ZERO EXIT STATUS
pub fn run_checked(cmd: Command, timeout: Duration) -> Result<ToolOutput, ToolError> {
    let tool = tool_name(&cmd);
    let out = run(cmd, timeout)?;
    if out.status.success() {
        Ok(out)
    } else {
        Err(ToolError::Failed {
            tool,
            status: out.status,
            stderr: out.stderr.trim().to_string(),
        })
    }
}
