//! End-to-end tests through the public client API.
//!
//! Each test file covers one scenario against a fake database, served
//! in-process or over TCP, and checks status, result shape and session
//! bookkeeping together.

#![cfg(test)]

mod helpers;

mod test_abandoned_scan;
mod test_parameter_binding;
mod test_plan_only_scan;
mod test_pool_ceiling;
mod test_scan_failure;
mod test_scan_select_42;
mod test_select_1;
mod test_tcp_round_trip;
mod test_timeout_and_cancel;
mod test_transaction_lifecycle;
