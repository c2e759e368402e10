#![forbid(unsafe_code)]

//! HTTP front for the outing workflow.

pub mod config;
pub mod http;
