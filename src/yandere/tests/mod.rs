//! Bulk download scenario tests
//!
//! These tests run whole downloads against a mock listing API and image host,
//! covering page skipping, retry budgets, idempotence, the worker pool bound,
//! single-flight runs and cancellation.
