#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

#[path = "../calibrate/mod.rs"]
pub mod calibrate;
