//! Detached GPG signatures for written reports.
//!
//! gpg, and any gpg-agent it launches, inherit the syscall filter of the
//! process that spawns them. [`SigningHelper`] is therefore forked while the
//! scanner is still unfiltered and single-threaded; once sealed, the scanner
//! only writes one request byte to it and reaps it.

use crate::config::types::{HostauditError, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe2, ForkResult, Pid};
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const SIGN_REQUEST: u8 = b'S';

/// Path of the ASCII-armored signature for `report`: `<report>.asc`
pub fn signature_path(report: &Path) -> PathBuf {
    let mut name = OsString::from(report.as_os_str());
    name.push(".asc");
    PathBuf::from(name)
}

/// Invokes `gpg --detach-sign` with the user's default key
#[derive(Debug, Clone)]
pub struct GpgSigner {
    program: PathBuf,
}

impl Default for GpgSigner {
    fn default() -> Self {
        Self::new("gpg")
    }
}

impl GpgSigner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Sign `report`, returning the signature path
    pub fn sign_detached(&self, report: &Path) -> Result<PathBuf> {
        let signature = signature_path(report);
        log::debug!(
            "Signing {} with {}",
            report.display(),
            self.program.display()
        );

        let output = Command::new(&self.program)
            .args(["--batch", "--yes", "--armor", "--detach-sign", "--output"])
            .arg(&signature)
            .arg(report)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                HostauditError::Signing(format!(
                    "cannot run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostauditError::Signing(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        log::info!("Signature written to {}", signature.display());
        Ok(signature)
    }
}

fn helper_error(op: &str, e: Errno) -> HostauditError {
    HostauditError::Signing(format!("signing helper {}: {}", op, e))
}

/// Forked signer waiting for the report to be written
pub struct SigningHelper {
    pid: Pid,
    report: PathBuf,
    request: Option<File>,
    status: Option<File>,
    reaped: bool,
}

impl SigningHelper {
    /// Fork a helper that signs `report` with `signer` on request.
    ///
    /// Must be called before any other thread exists.
    pub fn spawn(signer: GpgSigner, report: &Path) -> Result<Self> {
        // CLOEXEC keeps a daemonized gpg-agent from holding the status pipe open.
        let (request_read, request_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| helper_error("pipe(request)", e))?;
        let (status_read, status_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| helper_error("pipe(status)", e))?;

        // SAFETY: the process is single-threaded here, so the child owns a
        // consistent copy of the heap and the logger.
        match unsafe { fork() }.map_err(|e| helper_error("fork", e))? {
            ForkResult::Child => {
                drop(request_write);
                drop(status_read);
                let code = serve(
                    &signer,
                    report,
                    File::from(request_read),
                    File::from(status_write),
                );
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                drop(request_read);
                drop(status_write);
                log::debug!("Signing helper started (pid {})", child);
                Ok(Self {
                    pid: child,
                    report: report.to_path_buf(),
                    request: Some(File::from(request_write)),
                    status: Some(File::from(status_read)),
                    reaped: false,
                })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Have the helper sign the written report; returns the signature path
    pub fn sign(mut self) -> Result<PathBuf> {
        if let Some(mut request) = self.request.take() {
            request.write_all(&[SIGN_REQUEST]).map_err(|e| {
                HostauditError::Signing(format!("signing helper unavailable: {}", e))
            })?;
        }

        let mut message = String::new();
        if let Some(mut status) = self.status.take() {
            if let Err(e) = status.read_to_string(&mut message) {
                log::debug!("Cannot read signing helper status: {}", e);
            }
        }

        match self.reap()? {
            WaitStatus::Exited(_, 0) => {
                let signature = signature_path(&self.report);
                log::info!("Signature written to {}", signature.display());
                Ok(signature)
            }
            status if message.trim().is_empty() => Err(HostauditError::Signing(format!(
                "signing helper ended with {:?}",
                status
            ))),
            _ => Err(HostauditError::Signing(message.trim().to_string())),
        }
    }

    fn reap(&mut self) -> Result<WaitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => {
                    self.reaped = true;
                    return Ok(status);
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(helper_error("waitpid", e)),
            }
        }
    }
}

impl Drop for SigningHelper {
    /// Closing the request pipe without a byte tells the helper to exit unsigned
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        self.request.take();
        self.status.take();
        if let Err(e) = self.reap() {
            log::warn!("{}", e);
        }
    }
}

/// Helper side: block for a request, sign, report failures on `status`
fn serve(signer: &GpgSigner, report: &Path, mut request: File, mut status: File) -> i32 {
    let mut byte = [0u8; 1];
    match request.read(&mut byte) {
        Ok(1) if byte[0] == SIGN_REQUEST => {}
        _ => return 0,
    }

    match signer.sign_detached(report) {
        Ok(_) => 0,
        Err(e) => {
            let message = match e {
                HostauditError::Signing(message) => message,
                other => other.to_string(),
            };
            let _ = status.write_all(message.as_bytes());
            1
        }
    }
}
