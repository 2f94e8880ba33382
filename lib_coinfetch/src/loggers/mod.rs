/// Subscriber installation and log file rotation.
pub mod logger_setup;
