// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-worker resource ownership.
//!
//! Each worker holds exactly one set of engine handles for its lifetime,
//! built through a factory so tests can substitute stubs, plus a registry
//! of live subprocess children so shutdown can terminate strays.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::ffmpeg::MediaTools;
use crate::ocr::{OcrEngine, TesseractOcr};
use crate::transcribe::{Transcriber, WhisperCli};
use crate::AppConfig;

/// Poll step while waiting on a registered child
const WAIT_POLL: Duration = Duration::from_millis(50);

/// How long shutdown waits for a child to finish before killing it
const TERMINATE_WAIT: Duration = Duration::from_secs(2);

/// Tracks subprocess children spawned by one worker's engines. A child
/// stays registered for its whole run, so `terminate_all` can reach
/// anything still alive at shutdown.
pub struct ChildRegistry {
    children: Mutex<Vec<Child>>,
}

impl ChildRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            children: Mutex::new(Vec::new()),
        })
    }

    /// Run a command with all stdio detached, waiting for exit
    pub fn run_quiet(&self, mut cmd: Command) -> std::io::Result<ExitStatus> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn()?;
        let id = child.id();
        self.register(child);

        loop {
            {
                let mut guard = self.lock();
                let Some(pos) = guard.iter().position(|c| c.id() == id) else {
                    return Err(terminated_error());
                };
                if let Some(status) = guard[pos].try_wait()? {
                    guard.remove(pos);
                    return Ok(status);
                }
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    /// Run a command capturing stdout, waiting for exit
    pub fn run_capture(&self, mut cmd: Command) -> std::io::Result<(ExitStatus, Vec<u8>)> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn()?;
        let id = child.id();
        let mut pipe = child.stdout.take();
        self.register(child);

        // EOF on the pipe means the child is done (or was killed)
        let mut stdout = Vec::new();
        if let Some(pipe) = pipe.as_mut() {
            pipe.read_to_end(&mut stdout)?;
        }

        let status = self.reap(id)?;
        Ok((status, stdout))
    }

    fn register(&self, child: Child) {
        self.lock().push(child);
    }

    fn reap(&self, id: u32) -> std::io::Result<ExitStatus> {
        let mut guard = self.lock();
        let Some(pos) = guard.iter().position(|c| c.id() == id) else {
            return Err(terminated_error());
        };
        let mut child = guard.remove(pos);
        drop(guard);
        child.wait()
    }

    /// Terminate every registered child: give each a bounded window to
    /// finish on its own, then kill survivors. Called once per worker
    /// after its shutdown sentinel.
    pub fn terminate_all(&self) {
        let mut children = std::mem::take(&mut *self.lock());

        for child in &mut children {
            let deadline = Instant::now() + TERMINATE_WAIT;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => {
                        std::thread::sleep(WAIT_POLL);
                    }
                    Ok(None) => {
                        warn!("Killing stray child process {}", child.id());
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                    Err(e) => {
                        warn!("Could not wait on child {}: {}", child.id(), e);
                        break;
                    }
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Child>> {
        match self.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn terminated_error() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Interrupted,
        "child terminated during shutdown",
    )
}

/// Engine handles owned by one worker
pub struct WorkerResources {
    pub ocr: Box<dyn OcrEngine>,
    pub transcriber: Box<dyn Transcriber>,
    pub media: MediaTools,
    pub children: Arc<ChildRegistry>,
}

/// Builds a worker's resource set. Tests substitute stub engines here.
pub trait ResourceFactory: Send + Sync {
    fn build(&self) -> WorkerResources;
}

/// Factory for the subprocess-backed default engines
pub struct DefaultResourceFactory {
    whisper_model: String,
}

impl DefaultResourceFactory {
    pub fn new(config: &AppConfig) -> Arc<Self> {
        Arc::new(Self {
            whisper_model: config.extraction.whisper_model.clone(),
        })
    }
}

impl ResourceFactory for DefaultResourceFactory {
    fn build(&self) -> WorkerResources {
        debug!("Initializing worker engines");
        let children = ChildRegistry::new();

        WorkerResources {
            ocr: Box::new(TesseractOcr::new(children.clone())),
            transcriber: Box::new(WhisperCli::new(&self.whisper_model, children.clone())),
            media: MediaTools::new(children.clone()),
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_capture_collects_stdout() {
        let registry = ChildRegistry::new();
        let mut cmd = Command::new("echo");
        cmd.arg("hello");

        let (status, stdout) = registry.run_capture(cmd).unwrap();

        assert!(status.success());
        assert_eq!(String::from_utf8_lossy(&stdout).trim(), "hello");
    }

    #[test]
    fn terminate_all_on_empty_registry_is_a_no_op() {
        let registry = ChildRegistry::new();
        registry.terminate_all();
        assert!(registry.lock().is_empty());
    }
}
