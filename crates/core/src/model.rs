use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, OutingId, StudentId};
use crate::time::EpochMs;

/// Lifecycle status of an outing request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutingStatus {
    PendingFloorIncharge,
    PendingHostelIncharge,
    PendingWarden,
    Approved,
    Denied,
}

impl OutingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OutingStatus::Approved | OutingStatus::Denied)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutingStatus::PendingFloorIncharge => "pending_floor_incharge",
            OutingStatus::PendingHostelIncharge => "pending_hostel_incharge",
            OutingStatus::PendingWarden => "pending_warden",
            OutingStatus::Approved => "approved",
            OutingStatus::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_floor_incharge" => Some(OutingStatus::PendingFloorIncharge),
            "pending_hostel_incharge" => Some(OutingStatus::PendingHostelIncharge),
            "pending_warden" => Some(OutingStatus::PendingWarden),
            "approved" => Some(OutingStatus::Approved),
            "denied" => Some(OutingStatus::Denied),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three approval authorities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[serde(alias = "floor_incharge")]
    Floor,
    #[serde(alias = "hostel_incharge")]
    Hostel,
    Warden,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Floor, Tier::Hostel, Tier::Warden];

    /// Stage number at which this tier is authoritative.
    pub fn stage(self) -> u8 {
        match self {
            Tier::Floor => 1,
            Tier::Hostel => 2,
            Tier::Warden => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Floor => "floor",
            Tier::Hostel => "hostel",
            Tier::Warden => "warden",
        }
    }
}

/// Per-tier approval record. Only the approval transition writes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierApproval {
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approved_at: Option<EpochMs>,
    #[serde(default)]
    pub approved_by: Option<ActorId>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approvals {
    #[serde(default)]
    pub floor_incharge: TierApproval,
    #[serde(default)]
    pub hostel_incharge: TierApproval,
    #[serde(default)]
    pub warden: TierApproval,
}

impl Approvals {
    pub fn get(&self, tier: Tier) -> &TierApproval {
        match tier {
            Tier::Floor => &self.floor_incharge,
            Tier::Hostel => &self.hostel_incharge,
            Tier::Warden => &self.warden,
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut TierApproval {
        match tier {
            Tier::Floor => &mut self.floor_incharge,
            Tier::Hostel => &mut self.hostel_incharge,
            Tier::Warden => &mut self.warden,
        }
    }
}

/// Audit record of the denial that ended the workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Denial {
    pub tier: Tier,
    pub denied_by: ActorId,
    pub denied_at: EpochMs,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// A scannable artifact: the signed gate code and the image encoding its payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QrArtifact {
    pub gate_code: String,
    /// `data:` URL of the rendered QR image.
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QrCode {
    pub generated_at: EpochMs,
    pub check_out: QrArtifact,
    pub check_in: QrArtifact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateEvent {
    pub at: EpochMs,
    pub verified_by: ActorId,
    pub location: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tracking {
    #[serde(default)]
    pub check_out: Option<GateEvent>,
    #[serde(default)]
    pub check_in: Option<GateEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutingRequest {
    pub id: OutingId,
    pub student_id: StudentId,

    pub outing_date: NaiveDate,
    pub outing_time: NaiveTime,
    pub return_time: NaiveTime,
    pub purpose: String,

    pub status: OutingStatus,
    /// 1 = floor, 2 = hostel, 3 = warden. Derived from `approvals`.
    pub approval_stage: u8,
    #[serde(default)]
    pub approvals: Approvals,
    #[serde(default)]
    pub denial: Option<Denial>,

    #[serde(default)]
    pub qr_code: Option<QrCode>,
    #[serde(default)]
    pub tracking: Tracking,

    pub created_at: EpochMs,
    /// Bumped on every committed mutation; the store swaps on it.
    #[serde(default)]
    pub version: u64,
}

impl OutingRequest {
    /// A freshly submitted request: stage 1, awaiting the floor incharge.
    pub fn new(student_id: StudentId, req: NewOutingRequest, now: EpochMs) -> Self {
        Self {
            id: OutingId::new(),
            student_id,
            outing_date: req.outing_date,
            outing_time: req.outing_time,
            return_time: req.return_time,
            purpose: req.purpose.trim().to_string(),
            status: OutingStatus::PendingFloorIncharge,
            approval_stage: 1,
            approvals: Approvals::default(),
            denial: None,
            qr_code: None,
            tracking: Tracking::default(),
            created_at: now,
            version: 0,
        }
    }
}

/// Caller-supplied fields of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutingRequest {
    pub outing_date: NaiveDate,
    pub outing_time: NaiveTime,
    pub return_time: NaiveTime,
    pub purpose: String,
}

/// Directory data for a student, used to fill the QR payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudentProfile {
    pub id: StudentId,
    pub name: String,
    pub roll_number: String,
    pub phone: String,
    pub parent_phone: String,
    pub branch: String,
    pub room_number: String,
    #[serde(default)]
    pub hostel_block: Option<String>,
    #[serde(default)]
    pub floor: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Student,
    FloorIncharge,
    HostelIncharge,
    Warden,
    /// Gate staff.
    #[serde(alias = "gate-staff")]
    Security,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Role::Student),
            "floor-incharge" => Some(Role::FloorIncharge),
            "hostel-incharge" => Some(Role::HostelIncharge),
            "warden" => Some(Role::Warden),
            "security" | "gate-staff" => Some(Role::Security),
            _ => None,
        }
    }

    /// The approval tier this role decides, if any.
    pub fn tier(self) -> Option<Tier> {
        match self {
            Role::FloorIncharge => Some(Tier::Floor),
            Role::HostelIncharge => Some(Tier::Hostel),
            Role::Warden => Some(Tier::Warden),
            Role::Student | Role::Security => None,
        }
    }
}

/// An authenticated caller, as handed over by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: ActorId::from_str(id), role }
    }
}
