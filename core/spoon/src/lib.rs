//! Spoon is a simple metric gatherer for Linux systems.
//!
//! It runs a configurable set of collection [agents](agent::Agent), each on its
//! own interval, and forwards the resulting gauges to a [sink](sink::Sink) such
//! as a statsd daemon.
//!
//! # Architecture
//! - [`config`] describes the daemon, its sink and its agents (TOML).
//! - [`agent`] defines the `Agent` capability, the concrete agents and the
//!   registry that maps configured type names to constructors.
//! - [`sink`] defines the `Sink` capability and the built-in sinks.
//! - [`scheduler`] drives the agents: every enabled agent exactly once
//!   ([run-once](scheduler::Scheduler::run_once)), or one independent periodic
//!   loop per agent until shutdown ([continuous](scheduler::Scheduler::start)).
//!
//! The scheduling is backed by asynchronous **Tokio** tasks, one per agent, so
//! that a slow or failing agent never delays its siblings.

pub mod agent;
pub mod config;
pub mod scheduler;
pub mod sink;

#[cfg(any(test, feature = "test"))]
pub mod test;
