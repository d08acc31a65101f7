//! Hardware actuation

pub mod actuators;
