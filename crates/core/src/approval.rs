//! The three-tier approval state machine.
//!
//! Status and stage are a pure function of the three `approved` flags, checked
//! in priority order warden > hostel > floor. Denial is the only transition
//! that sets status directly, and it is terminal.

use serde::{Deserialize, Serialize};

use crate::error::{OutingError, OutingResult};
use crate::ids::ActorId;
use crate::model::{Approvals, Denial, OutingRequest, OutingStatus, Tier};
use crate::time::EpochMs;

/// A tier's verdict on a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub tier: Tier,
    pub approved: bool,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl Decision {
    pub fn approve(tier: Tier) -> Self {
        Self { tier, approved: true, remarks: None }
    }

    pub fn deny(tier: Tier, remarks: impl Into<String>) -> Self {
        Self { tier, approved: false, remarks: Some(remarks.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OutingStatus,
    pub to: OutingStatus,
    pub stage: u8,
}

/// Status and stage implied by the approval flags.
pub fn derive_status(approvals: &Approvals) -> (OutingStatus, u8) {
    if approvals.warden.approved {
        (OutingStatus::Approved, 3)
    } else if approvals.hostel_incharge.approved {
        (OutingStatus::PendingWarden, 3)
    } else if approvals.floor_incharge.approved {
        (OutingStatus::PendingHostelIncharge, 2)
    } else {
        (OutingStatus::PendingFloorIncharge, 1)
    }
}

/// Apply one tier's decision. Rejects without mutating when the request is terminal.
pub fn record_approval(
    req: &mut OutingRequest,
    decision: Decision,
    by: &ActorId,
    now: EpochMs,
) -> OutingResult<Transition> {
    if req.status.is_terminal() {
        return Err(OutingError::InvalidTransition { id: req.id.clone(), status: req.status });
    }

    let from = req.status;
    if decision.approved {
        let slot = req.approvals.get_mut(decision.tier);
        // First approval wins; a repeat keeps the original audit trail.
        if !slot.approved {
            slot.approved = true;
            slot.approved_at = Some(now);
            slot.approved_by = Some(by.clone());
            slot.remarks = decision.remarks;
        }
        let (status, stage) = derive_status(&req.approvals);
        req.status = status;
        req.approval_stage = stage;
    } else {
        req.status = OutingStatus::Denied;
        req.approval_stage = decision.tier.stage();
        req.denial = Some(Denial {
            tier: decision.tier,
            denied_by: by.clone(),
            denied_at: now,
            remarks: decision.remarks,
        });
    }

    Ok(Transition { from, to: req.status, stage: req.approval_stage })
}

/// Whether the workflow is complete enough to issue a gate pass.
pub fn can_issue_qr(req: &OutingRequest) -> bool {
    req.status == OutingStatus::Approved && req.approvals.warden.approved
}
