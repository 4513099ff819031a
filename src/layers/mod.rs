pub mod bilinear;
pub mod registry;
