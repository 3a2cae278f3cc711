//! End-to-end admission flows through the assembled router.

mod admission_flows;
