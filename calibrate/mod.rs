#![deny(dead_code)]
#![deny(unused_imports)]

pub mod ability;
pub mod data;
pub mod estimate;
pub mod items;
pub mod layout;
pub mod matrix;
pub mod model;
pub mod pirls;
pub mod types;
