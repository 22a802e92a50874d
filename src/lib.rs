pub mod api;
pub mod clock;
pub mod config;
pub mod control;
pub mod db;
pub mod events;
pub mod govee;
pub mod sensors;
pub mod shelly;
pub mod status;

#[cfg(test)]
mod testing;
