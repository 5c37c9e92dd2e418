//! Local devnet for the confidential payroll program.
//!
//! Plays both remote roles the payroll client talks to: the node that runs the program and
//! returns receipts, and the relayer that turns plaintext amounts into ciphertext handles.
//! State lives in sqlite.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod program;
pub mod relayer;
pub mod state;
