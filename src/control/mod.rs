//! In-band control plane for cryptographic rekey.
//!
//! Control messages are JSON objects carried on the encrypted data channel
//! behind the `0x02` packet-type prefix. Each role runs a small state
//! machine over `RUNNING -> NEGOTIATING -> SWAPPING -> RUNNING`; the GCS
//! initiates, the drone can veto via its safety guard, and exactly one
//! rekey is in flight per role at a time. The actual handshake runs
//! off-path; only [`ControlState::record_rekey_result`] moves the machine
//! back to `RUNNING`.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{ControlError, SuiteError};
use crate::crypto::kdf::Role;
use crate::suites;

/// Result carried by a `status` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusResult {
    /// The rekey installed the new context.
    Ok,
    /// The rekey failed; the old context stays active.
    Fail,
}

/// The closed set of control messages. Unknown `type` tags fail to parse
/// and are dropped by the proxy as `drop_other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMsg {
    /// GCS asks the drone to prepare for suite `suite`.
    PrepareRekey {
        /// Target suite identifier.
        suite: String,
        /// Request ID correlating the exchange.
        rid: String,
        /// Sender wall-clock milliseconds.
        t_ms: u64,
    },
    /// Drone accepts the prepare.
    PrepareOk {
        /// Request ID being acknowledged.
        rid: String,
        /// Sender wall-clock milliseconds.
        t_ms: u64,
    },
    /// Drone refuses the prepare.
    PrepareFail {
        /// Request ID being refused.
        rid: String,
        /// Refusal reason.
        reason: String,
        /// Sender wall-clock milliseconds.
        t_ms: u64,
    },
    /// GCS commits; both sides start their handshake workers.
    CommitRekey {
        /// Request ID being committed.
        rid: String,
        /// Sender wall-clock milliseconds.
        t_ms: u64,
    },
    /// Either side reports its rekey outcome.
    Status {
        /// Request ID the outcome belongs to.
        rid: String,
        /// Outcome.
        result: StatusResult,
        /// Active suite after the attempt.
        suite: String,
        /// Sender wall-clock milliseconds.
        t_ms: u64,
    },
}

/// Control-plane phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPhase {
    /// Steady state; no rekey in flight.
    Running,
    /// Prepare exchanged, waiting for commit/ok.
    Negotiating,
    /// Handshake worker running; context swap pending.
    Swapping,
}

impl ControlPhase {
    /// Uppercase phase label used in logs and the console.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlPhase::Running => "RUNNING",
            ControlPhase::Negotiating => "NEGOTIATING",
            ControlPhase::Swapping => "SWAPPING",
        }
    }
}

/// Rekey statistics surfaced in the final counters report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RekeyStats {
    /// Successful rekeys.
    pub rekeys_ok: u64,
    /// Failed or refused rekeys.
    pub rekeys_fail: u64,
    /// Duration of the last successful rekey handshake, milliseconds.
    pub last_rekey_ms: u64,
    /// Suite installed by the last successful rekey.
    pub last_rekey_suite: Option<String>,
}

/// Outcome of feeding one message to the state machine.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ControlAction {
    /// When set, the proxy must launch an off-path handshake worker
    /// toward `(suite_id, rid)`.
    pub start_handshake: Option<(String, String)>,
}

/// Per-role control state machine.
pub struct ControlState {
    role: Role,
    phase: ControlPhase,
    current_suite: String,
    pending: Option<(String, String)>,
    /// Messages awaiting encryption onto the data channel.
    pub outbox: VecDeque<ControlMsg>,
    /// Rekey statistics.
    pub stats: RekeyStats,
    last_status: Option<String>,
    safe_guard: Option<Box<dyn Fn() -> bool + Send>>,
    suite_enabled: Option<Box<dyn Fn(&str) -> bool + Send>>,
}

impl ControlState {
    /// Create the state machine in `RUNNING` on the given suite.
    pub fn new(role: Role, current_suite: impl Into<String>) -> Self {
        Self {
            role,
            phase: ControlPhase::Running,
            current_suite: current_suite.into(),
            pending: None,
            outbox: VecDeque::new(),
            stats: RekeyStats::default(),
            last_status: None,
            safe_guard: None,
            suite_enabled: None,
        }
    }

    /// Install the drone-side safety veto consulted on `prepare_rekey`.
    pub fn with_safe_guard(mut self, guard: impl Fn() -> bool + Send + 'static) -> Self {
        self.safe_guard = Some(Box::new(guard));
        self
    }

    /// Install the capability check rejecting negotiation toward suites the
    /// primitive provider cannot serve.
    pub fn with_suite_filter(mut self, enabled: impl Fn(&str) -> bool + Send + 'static) -> Self {
        self.suite_enabled = Some(Box::new(enabled));
        self
    }

    /// Current phase.
    pub fn phase(&self) -> ControlPhase {
        self.phase
    }

    /// Suite the active context runs on.
    pub fn current_suite(&self) -> &str {
        &self.current_suite
    }

    /// Last `status` line received from the peer, for the console.
    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    fn suite_is_enabled(&self, suite_id: &str) -> bool {
        self.suite_enabled.as_ref().is_none_or(|f| f(suite_id))
    }

    /// Operator/policy request to move to suite `alias` (GCS only).
    ///
    /// Queues `prepare_rekey` and enters `NEGOTIATING`. Returns the request
    /// ID, or `Busy` while another rekey is in flight.
    pub fn request_prepare(&mut self, alias: &str) -> Result<String, ControlError> {
        if self.role != Role::Gcs {
            return Err(ControlError::NotInitiator);
        }
        if self.phase != ControlPhase::Running {
            return Err(ControlError::Busy);
        }
        let suite_id = suites::resolve(alias)?;
        if !self.suite_is_enabled(&suite_id) {
            return Err(ControlError::Suite(SuiteError::UnknownSuite(suite_id)));
        }
        let rid = new_rid();
        self.outbox.push_back(ControlMsg::PrepareRekey {
            suite: suite_id.clone(),
            rid: rid.clone(),
            t_ms: now_ms(),
        });
        self.pending = Some((suite_id.clone(), rid.clone()));
        self.phase = ControlPhase::Negotiating;
        info!(suite_id, rid, "rekey prepare queued");
        Ok(rid)
    }

    /// Force a rekey without negotiation (GCS only): straight to
    /// `SWAPPING`, no messages queued.
    ///
    /// Used when the outbound encrypted channel can no longer carry
    /// control traffic, such as after sequence exhaustion; a
    /// `prepare_rekey` queued there would never reach the peer.
    pub fn force_rekey(&mut self, alias: &str) -> Result<String, ControlError> {
        if self.role != Role::Gcs {
            return Err(ControlError::NotInitiator);
        }
        if self.phase != ControlPhase::Running {
            return Err(ControlError::Busy);
        }
        let suite_id = suites::resolve(alias)?;
        if !self.suite_is_enabled(&suite_id) {
            return Err(ControlError::Suite(SuiteError::UnknownSuite(suite_id)));
        }
        let rid = new_rid();
        self.pending = Some((suite_id.clone(), rid.clone()));
        self.phase = ControlPhase::Swapping;
        info!(suite_id, rid, "forced rekey, bypassing negotiation");
        Ok(rid)
    }

    /// Feed one received control message through the state machine.
    pub fn handle(&mut self, msg: ControlMsg) -> ControlAction {
        match (self.role, msg) {
            (Role::Gcs, ControlMsg::PrepareOk { rid, .. }) => self.gcs_prepare_ok(rid),
            (Role::Gcs, ControlMsg::PrepareFail { rid, reason, .. }) => {
                self.gcs_prepare_fail(rid, reason)
            }
            (Role::Drone, ControlMsg::PrepareRekey { suite, rid, .. }) => {
                self.drone_prepare(suite, rid)
            }
            (Role::Drone, ControlMsg::CommitRekey { rid, .. }) => self.drone_commit(rid),
            (_, ControlMsg::Status { rid, result, suite, .. }) => {
                self.last_status = Some(format!("{rid}:{result:?}:{suite}"));
                debug!(rid, ?result, suite, "peer rekey status");
                ControlAction::default()
            }
            (role, msg) => {
                debug!(role = %role, ?msg, "ignoring control message out of turn");
                ControlAction::default()
            }
        }
    }

    fn gcs_prepare_ok(&mut self, rid: String) -> ControlAction {
        match (&self.phase, &self.pending) {
            (ControlPhase::Negotiating, Some((suite, pending_rid))) if *pending_rid == rid => {
                let suite = suite.clone();
                self.outbox.push_back(ControlMsg::CommitRekey {
                    rid: rid.clone(),
                    t_ms: now_ms(),
                });
                self.phase = ControlPhase::Swapping;
                ControlAction {
                    start_handshake: Some((suite, rid)),
                }
            }
            _ => {
                debug!(rid, "stale prepare_ok ignored");
                ControlAction::default()
            }
        }
    }

    fn gcs_prepare_fail(&mut self, rid: String, reason: String) -> ControlAction {
        match &self.pending {
            Some((_, pending_rid)) if *pending_rid == rid => {
                warn!(rid, reason, "peer refused rekey prepare");
                self.stats.rekeys_fail += 1;
                self.pending = None;
                self.phase = ControlPhase::Running;
            }
            _ => debug!(rid, "stale prepare_fail ignored"),
        }
        ControlAction::default()
    }

    fn drone_prepare(&mut self, suite: String, rid: String) -> ControlAction {
        let refusal = if self.phase != ControlPhase::Running {
            Some("busy")
        } else if suites::get(&suite).is_err() || !self.suite_is_enabled(&suite) {
            Some("unknown suite")
        } else if !self.safe_guard.as_ref().is_none_or(|g| g()) {
            Some("unsafe")
        } else {
            None
        };

        if let Some(reason) = refusal {
            warn!(suite, rid, reason, "refusing rekey prepare");
            self.stats.rekeys_fail += 1;
            self.outbox.push_back(ControlMsg::PrepareFail {
                rid,
                reason: reason.to_string(),
                t_ms: now_ms(),
            });
            return ControlAction::default();
        }

        self.pending = Some((suite, rid.clone()));
        self.phase = ControlPhase::Negotiating;
        self.outbox.push_back(ControlMsg::PrepareOk {
            rid,
            t_ms: now_ms(),
        });
        ControlAction::default()
    }

    fn drone_commit(&mut self, rid: String) -> ControlAction {
        match (&self.phase, &self.pending) {
            (ControlPhase::Negotiating, Some((suite, pending_rid))) if *pending_rid == rid => {
                let suite = suite.clone();
                self.phase = ControlPhase::Swapping;
                ControlAction {
                    start_handshake: Some((suite, rid)),
                }
            }
            _ => {
                debug!(rid, "stale commit_rekey ignored");
                ControlAction::default()
            }
        }
    }

    /// Record the handshake worker's outcome: queue `status`, update stats,
    /// and return to `RUNNING`. On success the new suite becomes current.
    pub fn record_rekey_result(&mut self, rid: &str, suite_id: &str, success: bool, elapsed_ms: u64) {
        let result = if success { StatusResult::Ok } else { StatusResult::Fail };
        let reported_suite = if success { suite_id } else { self.current_suite.as_str() };
        self.outbox.push_back(ControlMsg::Status {
            rid: rid.to_string(),
            result,
            suite: reported_suite.to_string(),
            t_ms: now_ms(),
        });
        if success {
            self.stats.rekeys_ok += 1;
            self.stats.last_rekey_ms = elapsed_ms;
            self.stats.last_rekey_suite = Some(suite_id.to_string());
            self.current_suite = suite_id.to_string();
            info!(suite_id, rid, elapsed_ms, "rekey successful");
        } else {
            self.stats.rekeys_fail += 1;
            warn!(suite_id, rid, "rekey failed; keeping current context");
        }
        self.pending = None;
        self.phase = ControlPhase::Running;
    }
}

/// Milliseconds since the Unix epoch, for `t_ms` fields.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn new_rid() -> String {
    format!("{:08x}", rand::random::<u32>())
}
