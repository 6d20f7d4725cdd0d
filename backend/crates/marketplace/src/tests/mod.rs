//! Crate-level scenario tests
//!
//! Use cases and the router run against in-memory collaborators from
//! `support`.

mod support;

mod checkout_tests;
