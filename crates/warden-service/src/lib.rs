pub mod commands;
pub mod console;
pub mod icmp;
pub mod monitor;
