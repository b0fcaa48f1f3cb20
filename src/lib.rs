//! Fieldbook library
//!
//! Booking lifecycle core for a sports-club site. Exposes modules for
//! integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
