//! keeper-lite: a membership lifecycle keeper over an external job registry.
//!
//! Three lifecycle managers each maintain a roster of on-chain entities
//! (gauges or tokens), slice it into fixed-capacity automation jobs, and
//! drive periodic batch passes over the live entries. A funding watchdog
//! keeps the jobs' registry balances topped up, and a withdrawal sweep
//! reclaims cancelled jobs once the registry's finality delay has elapsed.

pub mod action;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod manager;
pub mod node;
pub mod registry;
pub mod roster;
pub mod scenario;
pub mod shutdown;
pub mod watchdog;
pub mod worker;
