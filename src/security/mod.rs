//! The security core: pattern library, access policy, input validation,
//! command gate, path guard, and output sanitizer.
//!
//! Everything here is deliberately synchronous and allocation-light — these
//! checks sit on the hot path of every tool call.

pub mod access;
pub mod command_gate;
pub mod injection;
pub mod path_guard;
pub mod patterns;
pub mod sanitizer;

pub use access::{AccessDecision, AccessStore, check_access};
pub use command_gate::{CommandGate, GateDecision};
pub use injection::{InjectionScan, REFUSAL as INJECTION_REFUSAL, scan as scan_injection};
pub use path_guard::{FileOp, PathGuard};
pub use patterns::{PatternFile, PatternSet, PatternStore};
pub use sanitizer::{ENCODED_BLOCK_NOTICE, ENV_DUMP_NOTICE, OutputSanitizer};
