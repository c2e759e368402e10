use crate::model::{Actor, OutingRequest, Role, Tier};

/// Capability checks run before any state-machine operation.
///
/// Authentication happens upstream; a policy only decides what an already
/// identified actor may do.
pub trait ApprovalPolicy: Send + Sync {
    fn can_submit(&self, actor: &Actor) -> bool;
    fn can_approve(&self, actor: &Actor, tier: Tier, request: &OutingRequest) -> bool;
    fn can_issue_qr(&self, actor: &Actor, request: &OutingRequest) -> bool;
    fn can_verify(&self, actor: &Actor) -> bool;
}

/// Role-tag policy:
/// - students submit
/// - each incharge decides only their own tier, and only while that tier is
///   the authoritative stage
/// - the warden, or the owning student, may (re)issue the pass
/// - security staff and the warden verify scans
#[derive(Debug, Clone, Default)]
pub struct RolePolicy;

impl ApprovalPolicy for RolePolicy {
    fn can_submit(&self, actor: &Actor) -> bool {
        actor.role == Role::Student
    }

    fn can_approve(&self, actor: &Actor, tier: Tier, request: &OutingRequest) -> bool {
        actor.role.tier() == Some(tier) && request.approval_stage == tier.stage()
    }

    fn can_issue_qr(&self, actor: &Actor, request: &OutingRequest) -> bool {
        match actor.role {
            Role::Warden => true,
            Role::Student => actor.id.as_str() == request.student_id.as_str(),
            _ => false,
        }
    }

    fn can_verify(&self, actor: &Actor) -> bool {
        matches!(actor.role, Role::Security | Role::Warden)
    }
}

/// Accepts everything. For tests and for deployments that authorize upstream.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl ApprovalPolicy for AllowAll {
    fn can_submit(&self, _actor: &Actor) -> bool {
        true
    }
    fn can_approve(&self, _actor: &Actor, _tier: Tier, _request: &OutingRequest) -> bool {
        true
    }
    fn can_issue_qr(&self, _actor: &Actor, _request: &OutingRequest) -> bool {
        true
    }
    fn can_verify(&self, _actor: &Actor) -> bool {
        true
    }
}
