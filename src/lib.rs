#[macro_use]
extern crate tracing;

pub mod constants;
pub mod controllers;
pub mod errors;
pub mod io_models;
pub mod job_builder;
pub mod kubers_utils;
pub mod logger;
pub mod metrics_registry;
pub mod secret_manager;
pub mod services;
pub mod spawner;
mod string;
pub mod template;
