//! The outing workflow service: policy checks, state-machine transitions and
//! gate-pass handling, each committed as one compare-and-swap against the store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approval::{can_issue_qr, record_approval, Decision};
use crate::error::{EncodeError, OutingError, OutingResult};
use crate::ids::{OutingId, StudentId};
use crate::model::{
    Actor, GateEvent, NewOutingRequest, OutingRequest, OutingStatus, QrArtifact, QrCode,
    StudentProfile,
};
use crate::policy::{ApprovalPolicy, RolePolicy};
use crate::qr::{extract_gate_code, GateSigner, QrEncoder, QrPayload, ScanKind, SvgQrEncoder};
use crate::store::{OutingStore, StudentDirectory};
use crate::time::{now_ms, EpochMs};

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// HMAC key for gate codes.
    pub qr_secret: String,
    /// How many times a mutation reloads after losing a compare-and-swap race.
    pub cas_max_attempts: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { qr_secret: "change-me".into(), cas_max_attempts: 5 }
    }
}

/// Result of a successful gate scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReceipt {
    pub request_id: OutingId,
    pub student_id: StudentId,
    pub kind: ScanKind,
    pub event: GateEvent,
}

pub struct OutingWorkflow {
    store: Arc<dyn OutingStore>,
    students: Arc<dyn StudentDirectory>,
    policy: Box<dyn ApprovalPolicy>,
    encoder: Box<dyn QrEncoder>,
    signer: GateSigner,
    config: WorkflowConfig,
}

impl OutingWorkflow {
    pub fn new(
        store: Arc<dyn OutingStore>,
        students: Arc<dyn StudentDirectory>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            students,
            policy: Box::new(RolePolicy),
            encoder: Box::new(SvgQrEncoder::default()),
            signer: GateSigner::new(&config.qr_secret),
            config,
        }
    }

    pub fn with_policy(mut self, policy: impl ApprovalPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_encoder(mut self, encoder: impl QrEncoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    pub fn students(&self) -> &dyn StudentDirectory {
        self.students.as_ref()
    }

    /// Create a request in the initial state on behalf of a student.
    pub fn submit(&self, actor: &Actor, new: NewOutingRequest) -> OutingResult<OutingRequest> {
        if !self.policy.can_submit(actor) {
            return Err(OutingError::Forbidden(format!("{} may not submit outing requests", actor.id)));
        }
        validate_submission(&new)?;

        let student_id = StudentId::from_str(actor.id.as_str());
        let request = OutingRequest::new(student_id, new, now_ms());
        self.store.insert(&request)?;
        info!(request_id = %request.id, student_id = %request.student_id, "outing request submitted");
        Ok(request)
    }

    pub fn get(&self, id: &OutingId) -> OutingResult<OutingRequest> {
        self.store.get(id)?.ok_or_else(|| OutingError::NotFound(id.clone()))
    }

    pub fn list_by_status(&self, status: OutingStatus) -> OutingResult<Vec<OutingRequest>> {
        Ok(self.store.list_by_status(status)?)
    }

    pub fn list_for_student(&self, student_id: &StudentId) -> OutingResult<Vec<OutingRequest>> {
        Ok(self.store.list_for_student(student_id)?)
    }

    /// Record an approval or denial for one tier.
    pub fn decide(&self, actor: &Actor, id: &OutingId, decision: Decision) -> OutingResult<OutingRequest> {
        let tier = decision.tier;
        let (request, transition) = self.mutate(id, |req| {
            if req.status.is_terminal() {
                return Err(OutingError::InvalidTransition { id: req.id.clone(), status: req.status });
            }
            // the tier's own staff re-approving is a no-op, whatever the current stage
            let repeat =
                decision.approved && req.approvals.get(tier).approved && actor.role.tier() == Some(tier);
            if !repeat && !self.policy.can_approve(actor, tier, req) {
                return Err(OutingError::Forbidden(format!(
                    "{} may not decide the {} tier of request {}",
                    actor.id,
                    tier.as_str(),
                    req.id
                )));
            }
            record_approval(req, decision.clone(), &actor.id, now_ms())
        })?;

        info!(
            request_id = %id,
            tier = tier.as_str(),
            approved = decision.approved,
            from = %transition.from,
            to = %transition.to,
            stage = transition.stage,
            "outing decision recorded"
        );
        Ok(request)
    }

    /// Issue (or re-issue) the gate pass for a fully approved request.
    ///
    /// Re-issuing replaces both artifacts with a new timestamp, so codes from
    /// an earlier issuance stop resolving.
    pub fn issue_qr(&self, actor: &Actor, id: &OutingId) -> OutingResult<OutingRequest> {
        let current = self.get(id)?;
        if !self.policy.can_issue_qr(actor, &current) {
            return Err(OutingError::Forbidden(format!("{} may not issue a pass for {}", actor.id, id)));
        }
        if !can_issue_qr(&current) {
            return Err(OutingError::NotFullyApproved(id.clone()));
        }
        let student = self
            .students
            .student(&current.student_id)?
            .ok_or_else(|| OutingError::StudentNotFound(current.student_id.clone()))?;

        let (request, reissued) = self.mutate(id, |req| {
            if !can_issue_qr(req) {
                return Err(OutingError::NotFullyApproved(req.id.clone()));
            }
            // strictly newer than any earlier issuance so old codes go stale
            let generated_at = match &req.qr_code {
                Some(prev) => now_ms().max(prev.generated_at + 1),
                None => now_ms(),
            };
            let check_out = self.artifact(ScanKind::CheckOut, req, &student, generated_at)?;
            let check_in = self.artifact(ScanKind::CheckIn, req, &student, generated_at)?;
            let reissued = req.qr_code.is_some();
            req.qr_code = Some(QrCode { generated_at, check_out, check_in });
            Ok(reissued)
        })?;

        info!(request_id = %id, reissued, "gate pass issued");
        Ok(request)
    }

    fn artifact(
        &self,
        kind: ScanKind,
        req: &OutingRequest,
        student: &StudentProfile,
        generated_at: EpochMs,
    ) -> OutingResult<QrArtifact> {
        let code = self.signer.issue(kind, &req.id, generated_at);
        let payload = QrPayload::new(&code, req, student);
        let json = serde_json::to_string(&payload).map_err(EncodeError::from)?;
        let image = self.encoder.encode(&json)?;
        Ok(QrArtifact { gate_code: code.to_string(), image })
    }

    /// Validate a scanned pass and record the check-out or check-in.
    pub fn verify_scan(&self, actor: &Actor, scanned: &str, location: &str) -> OutingResult<ScanReceipt> {
        if !self.policy.can_verify(actor) {
            return Err(OutingError::Forbidden(format!("{} may not verify gate passes", actor.id)));
        }
        let code = extract_gate_code(scanned)?;
        if !self.signer.verify(&code) {
            warn!(request_id = %code.request_id, "gate code signature mismatch");
            return Err(OutingError::UnresolvedCode);
        }

        let location = location.trim().to_string();
        let result = self.mutate(&code.request_id, |req| {
            if req.status != OutingStatus::Approved {
                return Err(OutingError::RequestNotApproved { id: req.id.clone(), status: req.status });
            }
            match &req.qr_code {
                Some(qr) if qr.generated_at == code.issued_at => {}
                _ => return Err(OutingError::UnresolvedCode),
            }
            let event = GateEvent { at: now_ms(), verified_by: actor.id.clone(), location: location.clone() };
            match code.kind {
                ScanKind::CheckOut => {
                    if req.tracking.check_out.is_some() {
                        return Err(OutingError::OutOfSequenceScan("already checked out".into()));
                    }
                    req.tracking.check_out = Some(event.clone());
                }
                ScanKind::CheckIn => {
                    if req.tracking.check_out.is_none() {
                        return Err(OutingError::OutOfSequenceScan("check-in before check-out".into()));
                    }
                    if req.tracking.check_in.is_some() {
                        return Err(OutingError::OutOfSequenceScan("already checked in".into()));
                    }
                    req.tracking.check_in = Some(event.clone());
                }
            }
            Ok(event)
        });

        let (request, event) = match result {
            Ok(ok) => ok,
            Err(OutingError::NotFound(_)) => return Err(OutingError::UnresolvedCode),
            Err(e) => {
                warn!(request_id = %code.request_id, kind = ?code.kind, error = %e, "gate scan rejected");
                return Err(e);
            }
        };

        info!(request_id = %request.id, kind = ?code.kind, location = %event.location, "gate scan accepted");
        Ok(ScanReceipt { request_id: request.id, student_id: request.student_id, kind: code.kind, event })
    }

    /// Load, apply `f` to a copy, and commit with compare-and-swap. `f` runs
    /// again on fresh state after a lost race; an error from `f`, or a copy
    /// left unchanged, ends without writing.
    fn mutate<T>(
        &self,
        id: &OutingId,
        mut f: impl FnMut(&mut OutingRequest) -> OutingResult<T>,
    ) -> OutingResult<(OutingRequest, T)> {
        let attempts = self.config.cas_max_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self.get(id)?;
            let mut next = current.clone();
            let out = f(&mut next)?;
            if next == current {
                return Ok((current, out));
            }
            if self.store.compare_and_swap(current.version, &next)? {
                next.version = current.version + 1;
                return Ok((next, out));
            }
            debug!(request_id = %id, attempt, "compare-and-swap lost; reloading");
        }
        Err(OutingError::Conflict(id.clone()))
    }
}

fn validate_submission(new: &NewOutingRequest) -> OutingResult<()> {
    if new.purpose.trim().is_empty() {
        return Err(OutingError::InvalidRequest("purpose is required".into()));
    }
    Ok(())
}
