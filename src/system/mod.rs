//! # System Interaction Layer
//!
//! Everything that talks to the outside world on behalf of the handlers.
//!
//! ## Modules
//!
//! - **`cluster`**: the [`cluster::ClusterApi`] boundary, with a `kubectl`-backed
//!   implementation and an in-memory one.
//! - **`executor`**: spawns external processes (`kubectl`) and captures their
//!   output, honouring `Ctrl+C` cancellation.
//! - **`job_runner`**: builds script Job manifests and waits for them to finish.

pub mod cluster;
pub mod executor;
pub mod job_runner;
