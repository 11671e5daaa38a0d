use std::time::Duration;

use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::error::{Result, SwitchyardError};
use crate::traits::Unit;
use crate::types::{UnitKind, UnitOutput};

/// A unit instance tagged with the kind it was registered as.
///
/// The executor dispatches on the tag; all three variants share the same
/// `pre` / `execute` / `post` lifecycle.
pub enum CapabilityUnit {
    Node(Box<dyn Unit>),
    Agent(Box<dyn Unit>),
    Tool(Box<dyn Unit>),
}

impl CapabilityUnit {
    pub fn new(kind: UnitKind, unit: Box<dyn Unit>) -> Self {
        match kind {
            UnitKind::Node => Self::Node(unit),
            UnitKind::Agent => Self::Agent(unit),
            UnitKind::Tool => Self::Tool(unit),
        }
    }

    pub fn kind(&self) -> UnitKind {
        match self {
            Self::Node(_) => UnitKind::Node,
            Self::Agent(_) => UnitKind::Agent,
            Self::Tool(_) => UnitKind::Tool,
        }
    }

    pub fn name(&self) -> &str {
        self.inner().name()
    }

    fn inner(&self) -> &dyn Unit {
        match self {
            Self::Node(u) | Self::Agent(u) | Self::Tool(u) => u.as_ref(),
        }
    }

    /// Timeout to apply: step override, then the unit's own preference, then the engine default.
    pub fn effective_timeout(&self, step_override: Option<u64>, default_secs: u64) -> u64 {
        step_override
            .or_else(|| self.inner().timeout_secs())
            .unwrap_or(default_secs)
    }
}

impl std::fmt::Debug for CapabilityUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}

/// Run one unit through its full lifecycle.
///
/// `pre` and `execute` share one deadline of `timeout_secs`; `post` runs on
/// every path, including pre-hook failure and timeout, under its own limit
/// of the same length. When several phases fail, the reported error is
/// execute (or timeout), then pre, then post; the others are logged.
pub async fn invoke(
    unit: &CapabilityUnit,
    ctx: &mut ExecutionContext,
    timeout_secs: u64,
) -> Result<UnitOutput> {
    let inner = unit.inner();
    let name = inner.name().to_string();
    debug!(kind = %unit.kind(), unit = %name, timeout_secs, "Invoking unit");

    let limit = Duration::from_secs(timeout_secs);
    let deadline = tokio::time::Instant::now() + limit;
    let timed_out = || SwitchyardError::UnitTimeout {
        unit: name.clone(),
        timeout_secs,
    };

    let outcome = match tokio::time::timeout_at(deadline, inner.pre(ctx)).await {
        Ok(Ok(())) => match tokio::time::timeout_at(deadline, inner.execute(ctx)).await {
            Ok(result) => result.map_err(|e| attribute(&name, e)),
            Err(_) => Err(timed_out()),
        },
        Ok(Err(e)) => Err(hook_error(&name, "pre", e)),
        Err(_) => {
            warn!(unit = %name, timeout_secs, "pre hook timed out");
            Err(timed_out())
        }
    };

    let post = match tokio::time::timeout(limit, inner.post(ctx)).await {
        Ok(result) => result.map_err(|e| hook_error(&name, "post", e)),
        Err(_) => Err(timed_out()),
    };

    match (outcome, post) {
        (Ok(output), Ok(())) => {
            if unit.kind() == UnitKind::Agent && output.reply.is_none() {
                debug!(unit = %name, "Agent produced no reply text");
            }
            Ok(output)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(post_err)) => {
            warn!(unit = %name, error = %post_err, "post hook failed after an earlier failure");
            Err(e)
        }
    }
}

/// Keep errors that already name a unit (nested invocations); wrap the rest.
fn attribute(unit: &str, err: SwitchyardError) -> SwitchyardError {
    match err {
        e @ (SwitchyardError::UnitExecution { .. } | SwitchyardError::UnitTimeout { .. }) => e,
        other => SwitchyardError::unit(unit, other.to_string()),
    }
}

fn hook_error(unit: &str, phase: &str, err: SwitchyardError) -> SwitchyardError {
    SwitchyardError::unit(unit, format!("{} hook failed: {}", phase, err))
}
