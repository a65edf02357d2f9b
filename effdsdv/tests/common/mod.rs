#![allow(dead_code)]

pub mod graphs;
pub mod virtual_network;

use simplelog::{Config, LevelFilter, TestLogger};

pub fn init_logging() {
    // every test binary shares one logger, later calls fail harmlessly
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}
