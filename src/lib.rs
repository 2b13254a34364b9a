//! Core library for the scraper control panel.
//!
//! This library contains the device traits, the motor move controller, the
//! installation table and the operator front ends. It is used by both the
//! command-line panel and the egui window.

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
#[cfg(feature = "gui_egui")]
pub mod gui;
pub mod logging;
pub mod scraper;
pub mod shell;
