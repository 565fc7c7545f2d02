//! Node finite-state machine — a pure table: `(state, event) -> (next_state,
//! target_state)`. The FSM never touches storage or the reservation layer;
//! `crate::executor` calls `transition` under the node's exclusive
//! reservation and persists the result.

use thiserror::Error;

use crate::model::ProvisionState;

#[derive(Error, Debug)]
pub enum FsmError {
    #[error("event '{event}' is not valid from state {state:?}")]
    IllegalEvent { state: ProvisionState, event: String },
}

/// Named events a caller (API, heartbeat continuation, periodic) can
/// dispatch. `Fail` and `Hold` are reserved: accepted from almost any
/// non-terminal state (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Manage,
    Provide,
    Inspect,
    Clean,
    Service,
    Deploy,
    Delete,
    Rescue,
    Unrescue,
    Adopt,
    Abort,
    Hold,
    Resume,
    Fail,
    Done,
}

/// Outcome of a legal transition: the state to set immediately and the
/// `target_provision_state` the executor should drive toward (`None` once
/// the target state is itself stable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next_state: ProvisionState,
    pub target_state: Option<ProvisionState>,
}

fn t(next: ProvisionState, target: Option<ProvisionState>) -> Transition {
    Transition { next_state: next, target_state: target }
}

/// Look up the legal transition for `(state, event)`. Does not mutate
/// anything; callers apply the result to a `Node` under reservation.
pub fn transition(state: ProvisionState, event: Event) -> Result<Transition, FsmError> {
    use Event::*;
    use ProvisionState::*;

    // Reserved events usable from any non-terminal (non-stable-failed,
    // non-active-stable) state.
    if event == Fail && !state.is_stable() {
        return Ok(t(failed_state_for(state), None));
    }
    if event == Hold {
        let hold_state = match state {
            Cleaning | CleanWait => Some(CleanHold),
            Servicing | ServiceWait => Some(ServiceHold),
            Deploying | WaitCallback => Some(DeployingHold),
            _ => None,
        };
        if let Some(h) = hold_state {
            return Ok(t(h, None));
        }
    }

    let result = match (state, event) {
        (Enroll, Manage) => Some(t(Manageable, None)),
        (Manageable, Provide) => Some(t(Available, None)),
        (Manageable, Inspect) => Some(t(Inspecting, Some(Manageable))),
        (Inspecting, Done) => Some(t(Manageable, None)),
        (InspectWait, Done) => Some(t(Manageable, None)),
        (InspectFailed, Inspect) => Some(t(Inspecting, Some(Manageable))),

        (Manageable, Clean) => Some(t(Cleaning, Some(Manageable))),
        (Available, Clean) => Some(t(Cleaning, Some(Available))),
        (Cleaning, Done) => Some(t(Available, None)),
        (CleanWait, Done) => Some(t(Available, None)),
        (CleanFailed, Clean) => Some(t(Cleaning, Some(Manageable))),
        (CleanWait, Abort) => Some(t(CleanFailed, None)),
        (CleanHold, Resume) => Some(t(CleanWait, None)),
        (CleanHold, Abort) => Some(t(CleanFailed, None)),

        (Manageable, Service) => Some(t(Servicing, Some(Active))),
        (Active, Service) => Some(t(Servicing, Some(Active))),
        (Servicing, Done) => Some(t(Active, None)),
        (ServiceWait, Done) => Some(t(Active, None)),
        (ServiceFailed, Service) => Some(t(Servicing, Some(Active))),
        (ServiceWait, Abort) => Some(t(ServiceFailed, None)),
        (ServiceHold, Resume) => Some(t(ServiceWait, None)),
        (ServiceHold, Abort) => Some(t(ServiceFailed, None)),

        (Available, Deploy) => Some(t(Deploying, Some(Active))),
        (Deploying, Done) => Some(t(WaitCallback, None)),
        (WaitCallback, Done) => Some(t(Active, None)),
        (DeployFailed, Deploy) => Some(t(Deploying, Some(Active))),
        (WaitCallback, Abort) => Some(t(DeployFailed, None)),
        (DeployingHold, Resume) => Some(t(WaitCallback, None)),
        (DeployingHold, Abort) => Some(t(DeployFailed, None)),

        (Active, Delete) => Some(t(Deleting, Some(Available))),
        (Deleting, Done) => Some(t(Cleaning, Some(Available))),

        (Active, Rescue) => Some(t(Rescuing, Some(Rescue))),
        (Rescuing, Done) => Some(t(RescueWait, None)),
        (RescueWait, Done) => Some(t(Rescue, None)),
        (RescueFailed, Rescue) => Some(t(Rescuing, Some(Rescue))),

        (Rescue, Unrescue) => Some(t(Unrescuing, Some(Active))),
        (Unrescuing, Done) => Some(t(Active, None)),
        (UnrescueFailed, Unrescue) => Some(t(Unrescuing, Some(Active))),

        (Enroll, Adopt) => Some(t(Adopting, Some(Active))),
        (Adopting, Done) => Some(t(Active, None)),
        (AdoptFailed, Adopt) => Some(t(Adopting, Some(Active))),

        _ => None,
    };

    result.ok_or(FsmError::IllegalEvent { state, event: format!("{event:?}") })
}

fn failed_state_for(state: ProvisionState) -> ProvisionState {
    use ProvisionState::*;
    match state {
        Cleaning | CleanWait | CleanHold => CleanFailed,
        Servicing | ServiceWait | ServiceHold => ServiceFailed,
        Deploying | WaitCallback | DeployingHold => DeployFailed,
        Inspecting | InspectWait => InspectFailed,
        Rescuing | RescueWait => RescueFailed,
        Unrescuing => UnrescueFailed,
        Adopting => AdoptFailed,
        _ => Error,
    }
}
