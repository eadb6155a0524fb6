//! Waiting on node state from tests.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use relay_node::session::lifecycle::PhaseReceiver;
use relay_node::session::phase::{PhaseTransition, SessionPhase};
use relay_node::status::NodeStatus;
use tokio::sync::{broadcast, watch};

/// Wait until the phase is `phase`.
///
/// # Errors
///
/// Fails on timeout or if the node is gone.
pub async fn wait_for_phase(
    rx: &mut PhaseReceiver,
    phase: SessionPhase,
    timeout: Duration,
) -> Result<()> {
    tokio::time::timeout(timeout, rx.wait_for(|p| p == phase))
        .await
        .with_context(|| format!("phase {phase} not reached within {timeout:?}, still {}", rx.current()))?
        .ok_or_else(|| anyhow!("node dropped while waiting for {phase}"))?;
    Ok(())
}

/// Collect transitions until one lands in `target`.
///
/// Returns the destination phase of every transition seen, `target`
/// included.
///
/// # Errors
///
/// Fails on timeout, if the node is gone, or if the receiver lagged.
pub async fn collect_transitions_until(
    rx: &mut broadcast::Receiver<PhaseTransition>,
    target: SessionPhase,
    timeout: Duration,
) -> Result<Vec<SessionPhase>> {
    let mut seen = Vec::new();
    let collect = async {
        loop {
            let transition = rx.recv().await.context("transition feed closed")?;
            seen.push(transition.to);
            if transition.to == target {
                return Ok::<(), anyhow::Error>(());
            }
        }
    };
    match tokio::time::timeout(timeout, collect).await {
        Ok(result) => result?,
        Err(_) => bail!("no transition to {target} within {timeout:?}"),
    }
    Ok(seen)
}

/// Wait until the published status satisfies `predicate`.
///
/// # Errors
///
/// Fails on timeout or if the node is gone.
pub async fn wait_for_status(
    rx: &mut watch::Receiver<NodeStatus>,
    timeout: Duration,
    mut predicate: impl FnMut(&NodeStatus) -> bool,
) -> Result<NodeStatus> {
    let status = tokio::time::timeout(timeout, rx.wait_for(|s| predicate(s)))
        .await
        .context("status not reached in time")?
        .context("node dropped")?
        .clone();
    Ok(status)
}
