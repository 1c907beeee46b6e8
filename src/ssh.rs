//! Store access over the system OpenSSH client
//!
//! Every operation is a single non-interactive `ssh` invocation running a
//! small POSIX shell snippet on the host. Exit status 255 is ssh's own
//! failure (unreachable, authentication) and maps to a transport error; the
//! snippets exit with [`MISSING_EXIT`] when the file does not exist.

use crate::config::{AppConfig, SshConfig};
use crate::paths;
use reconcile::{Error, HostRef, Transport};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Exit status used by remote snippets for a missing file (EX_NOINPUT)
const MISSING_EXIT: i32 = 66;

/// Exit status of ssh itself failing
const SSH_FAILURE_EXIT: i32 = 255;

pub struct SshTransport {
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<String>,
    options: Vec<String>,
    connect_timeout_secs: u64,
    addresses: HashMap<String, String>,
}

impl SshTransport {
    pub fn new(ssh: &SshConfig, addresses: HashMap<String, String>) -> Self {
        Self {
            user: ssh.user.clone(),
            port: ssh.port,
            identity_file: ssh
                .identity_file
                .as_deref()
                .map(|f| paths::expand(f).display().to_string()),
            options: ssh.options.clone(),
            connect_timeout_secs: ssh.connect_timeout_secs,
            addresses,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let addresses = config
            .hosts
            .iter()
            .map(|h| (h.name.clone(), h.address().to_string()))
            .collect();
        Self::new(&config.fleet.ssh, addresses)
    }

    fn destination(&self, host: &HostRef) -> String {
        let address = self
            .addresses
            .get(&host.name)
            .map_or(host.name.as_str(), String::as_str);
        match &self.user {
            Some(user) => format!("{user}@{address}"),
            None => address.to_string(),
        }
    }

    /// Full ssh argument list for running `remote` on `host`
    fn args(&self, host: &HostRef, remote: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(self.destination(host));
        args.push(remote.to_string());
        args
    }

    fn run(&self, host: &HostRef, remote: &str, input: Option<&[u8]>) -> reconcile::Result<Output> {
        let args = self.args(host, remote);
        log::trace!("ssh {}", args.join(" "));

        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::transport(&host.name, format!("failed to execute ssh: {e}")))?;

        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(bytes)
                .map_err(|e| Error::transport(&host.name, format!("failed to send data: {e}")))?;
        }

        child
            .wait_with_output()
            .map_err(|e| Error::transport(&host.name, format!("ssh did not finish: {e}")))
    }

    /// Run a snippet and return its stdout
    fn exec(
        &self,
        host: &HostRef,
        path: &Path,
        remote: &str,
        input: Option<&[u8]>,
    ) -> reconcile::Result<Vec<u8>> {
        let output = self.run(host, remote, input)?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(status_error(host, path, output.status.code(), stderr.trim()))
    }
}

impl Transport for SshTransport {
    fn read_store(&self, host: &HostRef) -> reconcile::Result<Vec<u8>> {
        self.read_file(host, &host.store)
    }

    fn copy_store(&self, host: &HostRef, destination: &Path) -> reconcile::Result<()> {
        let script = copy_script(&host.store, destination);
        self.exec(host, &host.store, &script, None).map(|_| ())
    }

    fn read_file(&self, host: &HostRef, path: &Path) -> reconcile::Result<Vec<u8>> {
        let file = quote(path);
        let script = format!("[ -f {file} ] || exit {MISSING_EXIT}; cat -- {file}");
        self.exec(host, path, &script, None)
    }

    fn replace_store(&self, host: &HostRef, contents: &[u8]) -> reconcile::Result<()> {
        let script = replace_script(&host.store);
        self.exec(host, &host.store, &script, Some(contents)).map(|_| ())
    }
}

/// Copy the store to a backup path that must not exist yet, keeping mode and owner
fn copy_script(store: &Path, destination: &Path) -> String {
    let source = quote(store);
    let target = quote(destination);
    format!(
        "[ -f {source} ] || exit {MISSING_EXIT}; \
         [ ! -e {target} ] || {{ echo \"backup {target} already exists\" >&2; exit 1; }}; \
         cp -p -- {source} {target} && sync"
    )
}

/// Stage stdin next to the store and rename it into place.
///
/// The staging file starts as a `cp -p` of the store so the rename keeps its
/// mode and owner; `$$` keeps concurrent sessions on separate staging files.
fn replace_script(store: &Path) -> String {
    let target = quote(store);
    let staging = format!("{target}.driftguard.$$.tmp");
    format!(
        "{{ [ ! -f {target} ] || cp -p -- {target} {staging}; }} && cat > {staging} && sync \
         && mv -f -- {staging} {target} || {{ rm -f -- {staging}; exit 1; }}"
    )
}

/// Map a failed ssh invocation to a library error
fn status_error(host: &HostRef, path: &Path, code: Option<i32>, stderr: &str) -> Error {
    match code {
        Some(MISSING_EXIT) => Error::not_found(format!("{} on {}", path.display(), host.name)),
        Some(SSH_FAILURE_EXIT) => Error::transport(&host.name, stderr),
        Some(code) => Error::transport(&host.name, format!("remote command exited {code}: {stderr}")),
        None => Error::transport(&host.name, "ssh terminated by signal"),
    }
}

/// Single-quote a path for a POSIX shell
fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}
