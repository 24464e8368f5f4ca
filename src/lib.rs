pub mod camera;
pub mod config;
pub mod control;
pub mod hub;
pub mod kinematics;
pub mod logging;
pub mod orchestrator;
pub mod pose;
pub mod preprocess;
pub mod protocol;
pub mod server;
