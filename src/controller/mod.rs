//! # Controller Module
//!
//! Gamepad input handling.
//!
//! This module handles:
//! - Gamepad detection and event streaming via evdev
//! - Normalizing stick axes and numbering buttons
//! - Mapping stick deflection to motor duty with a dead zone
//! - Routing events to the channel bank in duo or solo mode

pub mod duty;
pub mod event;
pub mod gamepad;
pub mod router;
