#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod api;
pub mod channels;
pub mod config;
pub mod controller;
pub mod engine;
pub mod forms;
pub mod gateways;
pub mod records;
pub mod session;
