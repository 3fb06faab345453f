#![cfg_attr(not(feature = "std"), no_std)]
extern crate alloc;

use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    vec::Vec,
};

#[cfg(feature = "std")]
use std::collections::HashMap;

#[cfg(not(feature = "std"))]
use hashbrown::HashMap;

pub mod admin_record;
pub mod block;
pub mod bundle;
pub mod creation_timestamp;
pub mod dtn_time;
pub mod eid;
pub mod error;
pub mod hop_info;

pub use error::Error;

pub mod crc;
