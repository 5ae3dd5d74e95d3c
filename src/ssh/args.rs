//! Argument builders for the `ssh` and `rsync` invocations.

use std::ffi::OsString;

use camino::Utf8Path;
use shell_escape::unix::escape;

use super::SshConfig;

/// Expands a leading `~/` prefix to the user's home directory.
///
/// Paths are returned unchanged when `HOME` is unset.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

pub(super) fn common_ssh_options(config: &SshConfig) -> Vec<OsString> {
    let mut args = vec![OsString::from("-p"), OsString::from(config.port.to_string())];

    if let Some(identity_file) = config.identity_file.as_deref() {
        args.push(OsString::from("-i"));
        args.push(OsString::from(expand_tilde(identity_file)));
    }

    if config.batch_mode {
        args.push(OsString::from("-o"));
        args.push(OsString::from("BatchMode=yes"));
    }

    if !config.strict_host_key_checking {
        args.push(OsString::from("-o"));
        args.push(OsString::from("StrictHostKeyChecking=no"));
    }

    if !config.known_hosts_file.trim().is_empty() {
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "UserKnownHostsFile={}",
            config.known_hosts_file
        )));
    }

    args
}

pub(super) fn ssh_args(config: &SshConfig, host: &str, remote_command: &str) -> Vec<OsString> {
    let mut args = common_ssh_options(config);
    args.push(OsString::from(format!("{}@{host}", config.user)));
    args.push(OsString::from(remote_command));
    args
}

pub(super) fn rsync_args(
    config: &SshConfig,
    host: &str,
    src: &Utf8Path,
    dst: &str,
    exclude: &[&str],
) -> Vec<OsString> {
    let mut args = vec![OsString::from("-az")];
    for pattern in exclude {
        args.push(OsString::from("--exclude"));
        args.push(OsString::from(*pattern));
    }
    args.push(OsString::from("--rsh"));
    args.push(OsString::from(remote_shell(config)));
    args.push(OsString::from(src.as_str()));
    args.push(OsString::from(format!("{}@{host}:{dst}", config.user)));
    args
}

pub(super) fn upload_command(dst: &str) -> String {
    format!("cat > {}", escape(dst.into()))
}

fn remote_shell(config: &SshConfig) -> String {
    let opts = common_ssh_options(config)
        .into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} {opts}", config.ssh_bin)
}
