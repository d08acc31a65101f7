//! Agent runtime application

pub mod check;
pub mod options;
pub mod run;
pub mod state;
