//! Test suites for the kisa server.

mod dispatcher;
mod support;
