#![forbid(unsafe_code)]

//! Outing request approval workflow: the three-tier state machine, QR gate
//! codes, and the store/policy seams the daemon plugs into.

pub mod approval;
pub mod error;
pub mod ids;
pub mod model;
pub mod policy;
pub mod qr;
pub mod store;
pub mod time;
pub mod workflow;

pub use approval::*;
pub use error::*;
pub use ids::*;
pub use model::*;
pub use policy::*;
pub use qr::*;
pub use store::*;
pub use time::*;
pub use workflow::*;
