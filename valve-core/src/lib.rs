#![no_std]

// Shared scheduling core for the radiator-valve thermostat.
//
// This crate stays portable across the MCU firmware and the host emulator by
// avoiding the Rust standard library. Hardware reaches it only through the
// collaborator traits in `board`; interrupt handlers reach it only through
// `pending::PendingWork`.

pub mod basic;
pub mod board;
pub mod cascade;
pub mod dispatch;
pub mod pending;
pub mod power;
pub mod startup;
pub mod trace;
