#[cfg(feature = "devel")]
pub mod debug;

pub mod beam;
pub mod config;
pub mod fader;
pub mod first_person_controller;
pub mod game;
pub mod input;
pub mod physics;
pub mod portal;
