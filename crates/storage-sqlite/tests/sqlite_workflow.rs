//! The workflow running against the durable store.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use outing_core::{
    Actor, Decision, NewOutingRequest, OutingError, OutingStatus, OutingStore, OutingWorkflow, Role,
    StudentDirectory, StudentId, StudentProfile, Tier, WorkflowConfig,
};
use outing_storage_sqlite::SqliteStore;
use tempfile::tempdir;

fn workflow(store: Arc<SqliteStore>) -> OutingWorkflow {
    OutingWorkflow::new(
        store.clone(),
        store,
        WorkflowConfig { qr_secret: "sqlite-secret".into(), cas_max_attempts: 3 },
    )
}

#[test]
fn pass_survives_reopen_and_checks_in() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("outing.db");
    let student = Actor::new("21CE055", Role::Student);
    let guard = Actor::new("gate-north", Role::Security);

    let (id, qr) = {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        store
            .upsert_student(&StudentProfile {
                id: StudentId::from_str("21CE055"),
                name: "Kiran".into(),
                roll_number: "21CE055".into(),
                phone: "9111111111".into(),
                parent_phone: "9222222222".into(),
                branch: "CIVIL".into(),
                room_number: "D-008".into(),
                hostel_block: None,
                floor: None,
            })
            .unwrap();
        let wf = workflow(store);
        let req = wf
            .submit(
                &student,
                NewOutingRequest {
                    outing_date: NaiveDate::from_ymd_opt(2026, 11, 14).unwrap(),
                    outing_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    return_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                    purpose: "eye checkup".into(),
                },
            )
            .unwrap();
        wf.decide(&Actor::new("fi", Role::FloorIncharge), &req.id, Decision::approve(Tier::Floor)).unwrap();
        wf.decide(&Actor::new("hi", Role::HostelIncharge), &req.id, Decision::approve(Tier::Hostel)).unwrap();
        wf.decide(&Actor::new("w", Role::Warden), &req.id, Decision::approve(Tier::Warden)).unwrap();
        let issued = wf.issue_qr(&student, &req.id).unwrap();
        wf.verify_scan(&guard, &issued.qr_code.as_ref().unwrap().check_out.gate_code, "north").unwrap();
        (req.id, issued.qr_code.unwrap())
    };

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let stored = store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, OutingStatus::Approved);
    assert!(stored.tracking.check_out.is_some());
    assert_eq!(stored.qr_code.as_ref(), Some(&qr));

    let wf = workflow(store.clone());
    let err = wf.verify_scan(&guard, &qr.check_out.gate_code, "north").unwrap_err();
    assert!(matches!(err, OutingError::OutOfSequenceScan(_)));
    wf.verify_scan(&guard, &qr.check_in.gate_code, "north").unwrap();
    assert!(store.get(&id).unwrap().unwrap().tracking.check_in.is_some());
}

#[test]
fn denial_is_persisted() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let wf = workflow(store.clone());
    let req = wf
        .submit(
            &Actor::new("s9", Role::Student),
            NewOutingRequest {
                outing_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
                outing_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                return_time: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
                purpose: "concert".into(),
            },
        )
        .unwrap();
    wf.decide(&Actor::new("fi", Role::FloorIncharge), &req.id, Decision::deny(Tier::Floor, "curfew"))
        .unwrap();

    let denied = store.list_by_status(OutingStatus::Denied).unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].denial.as_ref().unwrap().remarks.as_deref(), Some("curfew"));
    assert_eq!(denied[0].version, 1);
}
