//! # CallFlow Gateway Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Criterion benchmarks (limiter admit, token verify)
//! └── src/
//!     └── integration/  # Full router driven request by request
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p cf-tests
//! cargo test -p cf-tests integration::
//! cargo bench -p cf-tests
//! ```

pub mod integration;
