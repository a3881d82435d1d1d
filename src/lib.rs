//! stackforge: delivery-pipeline stacks as code.
//!
//! A shared stack declares the source repository and one image registry per
//! stage. Each pipeline stack declares a network, a table, a load-balanced
//! container service and the Source → Build → [Approval] → Deploy pipeline
//! that ships it. Templates are deterministic and BLAKE3-hashed, with
//! per-stack state locks and drift detection.

pub mod cli;
pub mod core;
pub mod resources;
pub mod tripwire;
