//! SSH port allocation.
//!
//! There is no allocator state. Every allocation re-reads the ports the
//! engine has handed out (from container labels) and the ports bound on the
//! host, then takes the first free one in the range.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::process::Stdio;
use tracing::debug;

use crate::engine::{ContainerEngine, LABEL_SSH_PORT};
use crate::error::SessionError;

/// Host ports cai publishes container sshd on.
pub(crate) const SSH_PORT_RANGE: RangeInclusive<u16> = 2300..=2500;

/// Source of the host's currently bound TCP listener ports.
#[async_trait]
pub(crate) trait HostPorts: Send + Sync {
    async fn bound_tcp_ports(&self) -> BTreeSet<u16>;
}

/// Reads listeners from `ss -Htln`.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SocketTable;

#[async_trait]
impl HostPorts for SocketTable {
    async fn bound_tcp_ports(&self) -> BTreeSet<u16> {
        let output = tokio::process::Command::new("ss")
            .args(["-H", "-t", "-l", "-n"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => parse_ss_listeners(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                debug!("ss exited with {:?}, assuming no host listeners", out.status.code());
                BTreeSet::new()
            }
            Err(e) => {
                debug!("ss unavailable ({e}), assuming no host listeners");
                BTreeSet::new()
            }
        }
    }
}

/// Extracts local ports from `ss -Htln` output.
///
/// Lines look like `LISTEN 0 4096 127.0.0.1:2300 0.0.0.0:*`; the local
/// address is the fourth column and the port follows its last `:`.
pub(crate) fn parse_ss_listeners(output: &str) -> BTreeSet<u16> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .filter_map(|local| local.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse().ok())
        .collect()
}

/// First port in `SSH_PORT_RANGE` neither labelled on a container nor bound on the host.
pub(crate) async fn allocate_ssh_port(
    engine: &dyn ContainerEngine,
    context: &str,
    host: &dyn HostPorts,
) -> Result<u16> {
    let reserved: BTreeSet<u16> = engine
        .label_values(context, LABEL_SSH_PORT)
        .await?
        .iter()
        .filter_map(|v| v.parse().ok())
        .collect();
    let bound = host.bound_tcp_ports().await;

    debug!("Reserved ssh ports: {reserved:?}, host listeners in range: {:?}",
        bound.range(SSH_PORT_RANGE).collect::<Vec<_>>());

    SSH_PORT_RANGE
        .into_iter()
        .find(|p| !reserved.contains(p) && !bound.contains(p))
        .ok_or_else(|| {
            SessionError::infrastructure(format!(
                "No free SSH port in {}-{}",
                SSH_PORT_RANGE.start(),
                SSH_PORT_RANGE.end()
            ))
            .into()
        })
}

/// A fixed set of bound ports.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct FixedPorts(pub BTreeSet<u16>);

#[cfg(test)]
#[async_trait]
impl HostPorts for FixedPorts {
    async fn bound_tcp_ports(&self) -> BTreeSet<u16> {
        self.0.clone()
    }
}
