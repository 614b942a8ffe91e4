//! Common test utilities for the Plugwise integration
//!
//! Scripted Smile and USB-stick clients, fixture loading and a helper that
//! sets up an entry against an in-memory host.

#![allow(dead_code)]

mod fixtures;
mod mock_smile;
mod mock_stick;
mod test_hass;

pub use fixtures::*;
pub use mock_smile::*;
pub use mock_stick::*;
pub use test_hass::*;
