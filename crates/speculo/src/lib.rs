pub mod config;
pub mod face_database;
pub mod logging;
pub mod registry;
pub mod report;
pub mod speculo;
pub mod util;
