//! # Rover Bridge Library
//!
//! Drive a six-wheel rover with a gamepad.
//!
//! This library provides the core functionality for turning gamepad stick
//! input into rate-limited motor duty cycles, delivered either to a motor
//! microcontroller over a serial link or to local GPIO PWM.

pub mod channels;
pub mod config;
pub mod controller;
pub mod error;
pub mod indicator;
pub mod journal;
pub mod link;
pub mod retry;
pub mod session;
