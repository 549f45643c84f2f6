//! The two gates that surround the agent from outside: the serialized
//! outbound send gate and the concurrency/admission gate.

pub mod concurrency;
pub mod rate_limit;

pub use concurrency::{Admission, AdmissionPermit, ConcurrencyGate};
pub use rate_limit::SendGate;
