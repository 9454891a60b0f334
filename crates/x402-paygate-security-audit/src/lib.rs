//! Source-level security invariants for the paygate workspace.
//!
//! All checks live in `tests/`; this crate has no runtime code.
