//! Integration tests for strmsync-remote
//!
//! Uses wiremock to simulate both cloud drive APIs and verifies end-to-end
//! behavior of the request executor and the two backend adapters.

mod common;

mod test_drive115;
mod test_executor;
mod test_openlist;
