#![allow(dead_code)]

use std::sync::Once;

pub mod fakes;
pub mod fixtures;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        ticket_migrate::logging::init_test_logging();
    });
}
