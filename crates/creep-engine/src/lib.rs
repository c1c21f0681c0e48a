//! Scheduling engine for the CREEP asset pool.
//!
//! Three cooperating actors share one state machine over assets and leases,
//! coordinated entirely through skip-locked claims in Postgres plus a worker
//! queue:
//!
//! - [`loader::Loader`] matches pending task orders to ready assets, writes
//!   leases and publishes work.
//! - [`janitor::Janitor`] returns stuck (lock-expired) and cooled assets to
//!   the ready pool in bounded batches.
//! - [`worker::Worker`] consumes queued payloads, executes them through a
//!   vendor adapter and settles the terminal state atomically.
//!
//! Any asset is driven by at most one of them at a time without a global
//! lock; contention degrades to empty claim results, never to queueing.

pub mod dispenser;
pub mod events;
pub mod janitor;
pub mod loader;
pub mod worker;
