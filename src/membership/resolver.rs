//! Membership resolution for the local etcd member.
//!
//! Decides whether this node forms a new cluster or joins an existing one,
//! registering itself through `MemberAdd` when joining. The result is a
//! [`MembershipDecision`] carrying the `--initial-cluster` and
//! `--initial-cluster-state` values.
//!
//! Probing an existing cluster retries on transient failures at a fixed
//! interval until it succeeds, the caller cancels, or the configured attempt
//! cap or deadline is reached. Fatal failures end resolution immediately.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{MembershipError, Result};
use super::identity::MemberIdentity;
use super::state_machine::{ResolverEvent, ResolverPhase, ResolverStateMachine, TransitionResult};
use crate::client::{ClusterState, EtcdMember, MemberApi, ProbeConnector, discovery_client_url};

/// How often and for how long to probe an existing cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts.
    pub interval: Duration,
    /// Give up after this many attempts (`None` = unlimited).
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the first attempt.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: None,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Outcome of membership resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipDecision {
    /// Value of `--initial-cluster`: comma-joined `name=peerURL` pairs.
    pub initial_cluster: String,
    /// Value of `--initial-cluster-state`.
    pub cluster_state: ClusterState,
    pub self_name: String,
    pub self_peer_url: String,
    /// Whether this run registered the member through `MemberAdd`.
    pub member_added: bool,
}

impl MembershipDecision {
    /// Decision for a node forming a brand-new single-member cluster.
    pub fn new_cluster(identity: &MemberIdentity) -> Self {
        Self {
            initial_cluster: identity.initial_cluster_entry(),
            cluster_state: ClusterState::New,
            self_name: identity.name().to_string(),
            self_peer_url: identity.peer_url().to_string(),
            member_added: false,
        }
    }

    /// Decision for a node joining an existing cluster. `peers` are the other
    /// members; self is appended last.
    pub fn existing(identity: &MemberIdentity, peers: &[(String, String)], member_added: bool) -> Self {
        let initial_cluster = peers
            .iter()
            .map(|(name, url)| format!("{}={}", name, url))
            .chain(std::iter::once(identity.initial_cluster_entry()))
            .collect::<Vec<_>>()
            .join(",");

        Self {
            initial_cluster,
            cluster_state: ClusterState::Existing,
            self_name: identity.name().to_string(),
            self_peer_url: identity.peer_url().to_string(),
            member_added,
        }
    }

    /// `(name, peerURL)` pairs of `initial_cluster`, in order.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        self.initial_cluster
            .split(',')
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.split_once('=').unwrap_or((entry, "")))
            .collect()
    }
}

/// What a scan of the member list concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    /// Other members, sorted by `(name, peerURL)`, unique by peer URL.
    pub peers: Vec<(String, String)>,
    /// Self's peer URL is already in the member list.
    pub already_registered: bool,
}

/// Classify a member list against this node's identity.
///
/// A started member on self's peer URL, or an unstarted one, both mean self
/// is registered. An unstarted member on any other URL means another node is
/// mid-join and the scan is reported as transient.
pub fn plan_join(identity: &MemberIdentity, members: &[EtcdMember]) -> Result<JoinPlan> {
    let mut already_registered = false;
    let mut peers = Vec::with_capacity(members.len());

    for member in members {
        if member.peer_urls.iter().any(|url| url == identity.peer_url()) {
            already_registered = true;
            continue;
        }

        let Some(peer_url) = member.peer_url() else {
            return Err(MembershipError::Transient(format!(
                "member {:x} has no peer URL",
                member.id
            )));
        };

        if !member.is_started() {
            return Err(MembershipError::Transient(format!(
                "member {:x} at {} has been added but not started",
                member.id, peer_url
            )));
        }

        peers.push((member.name.clone(), peer_url.to_string()));
    }

    peers.sort();
    let mut seen = HashSet::new();
    peers.retain(|(_, url)| seen.insert(url.clone()));

    Ok(JoinPlan {
        peers,
        already_registered,
    })
}

/// Resolves the local member's place in an etcd cluster.
pub struct MembershipResolver<C> {
    identity: MemberIdentity,
    peer_endpoints: Option<String>,
    policy: RetryPolicy,
    connector: C,
    state_machine: ResolverStateMachine,
}

impl<C: ProbeConnector> MembershipResolver<C> {
    /// `peer_endpoints` is the comma-separated endpoint list of an existing
    /// control plane; `None` or blank forms a new cluster.
    pub fn new(
        identity: MemberIdentity,
        peer_endpoints: Option<String>,
        policy: RetryPolicy,
        connector: C,
    ) -> Self {
        let peer_endpoints = peer_endpoints
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Self {
            identity,
            peer_endpoints,
            policy,
            connector,
            state_machine: ResolverStateMachine::new(),
        }
    }

    pub fn identity(&self) -> &MemberIdentity {
        &self.identity
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolve membership, probing and retrying as needed.
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<MembershipDecision> {
        let mut phase = ResolverPhase::Init;

        if cancel.is_cancelled() {
            self.advance(&mut phase, ResolverEvent::Cancelled)?;
            return Err(MembershipError::Cancelled);
        }

        let Some(peers) = self.peer_endpoints.as_deref() else {
            self.advance(&mut phase, ResolverEvent::NoPeerConfigured)?;
            info!(
                name = %self.identity.name(),
                peer_url = %self.identity.peer_url(),
                "No existing peer configured, forming a new etcd cluster"
            );
            return Ok(MembershipDecision::new_cluster(&self.identity));
        };

        let endpoint = match discovery_client_url(peers) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.advance(&mut phase, ResolverEvent::FatalFailure)?;
                return Err(MembershipError::Fatal(format!(
                    "invalid peer endpoint {:?}: {}",
                    peers, e
                )));
            }
        };

        self.advance(&mut phase, ResolverEvent::ProbeStarted)?;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            info!(attempt, endpoint = %endpoint, "Probing existing etcd cluster");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.advance(&mut phase, ResolverEvent::Cancelled)?;
                    return Err(MembershipError::Cancelled);
                }
                outcome = self.probe_once(&endpoint) => outcome,
            };

            let error = match outcome {
                Ok((decision, event)) => {
                    self.advance(&mut phase, event)?;
                    info!(
                        attempt,
                        member_added = decision.member_added,
                        initial_cluster = %decision.initial_cluster,
                        "Joining existing etcd cluster"
                    );
                    return Ok(decision);
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    self.advance(&mut phase, ResolverEvent::FatalFailure)?;
                    warn!(attempt, endpoint = %endpoint, error = %e, "Membership resolution failed");
                    return Err(e);
                }
            };

            self.advance(&mut phase, ResolverEvent::TransientFailure)?;
            warn!(
                attempt,
                endpoint = %endpoint,
                error = %error,
                retry_in = ?self.policy.interval,
                "Etcd cluster probe failed, will retry"
            );

            if let Some(max) = self.policy.max_attempts
                && attempt >= max
            {
                self.advance(&mut phase, ResolverEvent::AttemptsExhausted)?;
                return Err(MembershipError::AttemptsExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let mut wait = self.policy.interval;
            if let Some(deadline) = self.policy.deadline {
                let remaining = deadline.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    self.advance(&mut phase, ResolverEvent::DeadlineExceeded)?;
                    return Err(MembershipError::DeadlineExceeded {
                        deadline,
                        attempts: attempt,
                        last_error: error.to_string(),
                    });
                }
                wait = wait.min(remaining);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.advance(&mut phase, ResolverEvent::Cancelled)?;
                    return Err(MembershipError::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }

            if let Some(deadline) = self.policy.deadline
                && started.elapsed() >= deadline
            {
                self.advance(&mut phase, ResolverEvent::DeadlineExceeded)?;
                return Err(MembershipError::DeadlineExceeded {
                    deadline,
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            self.advance(&mut phase, ResolverEvent::RetryElapsed)?;
        }
    }

    /// One connect, list and (if needed) add round.
    async fn probe_once(&self, endpoint: &str) -> Result<(MembershipDecision, ResolverEvent)> {
        let client = self.connector.connect(endpoint).await?;
        let members = client.list_members().await?;
        debug!(count = members.len(), "Listed etcd members");

        let plan = plan_join(&self.identity, &members)?;
        if plan.already_registered {
            info!(
                peer_url = %self.identity.peer_url(),
                "Member already registered, skipping MemberAdd"
            );
            return Ok((
                MembershipDecision::existing(&self.identity, &plan.peers, false),
                ResolverEvent::AlreadyRegistered,
            ));
        }

        let added = client.add_member(self.identity.peer_url()).await?;
        info!(
            member_id = %format!("{:x}", added.id),
            peer_url = %self.identity.peer_url(),
            "Added etcd member"
        );

        Ok((
            MembershipDecision::existing(&self.identity, &plan.peers, true),
            ResolverEvent::MemberAdded,
        ))
    }

    fn advance(&self, phase: &mut ResolverPhase, event: ResolverEvent) -> Result<()> {
        match self.state_machine.transition(phase, &event) {
            TransitionResult::Success {
                from,
                to,
                description,
                ..
            } => {
                debug!(from = %from, to = %to, event = %event, "{}", description);
                *phase = to;
                Ok(())
            }
            TransitionResult::InvalidTransition { current, event } => Err(MembershipError::Fatal(
                format!("invalid resolver transition from {} on {}", current, event),
            )),
        }
    }
}
