//! Property-based tests for the resolution runtime
//!
//! Uses proptest to verify invariants of the service locator:
//! 1. Resolution idempotency - repeated gets return the same singleton
//! 2. Scope isolation - each request scope builds its own instance
//! 3. Single flight - concurrent gets for one key run the recipe once
//! 4. Cycle detection - every ring length is reported with a closed path

mod resolution_properties;
