//! Supporting utilities

pub mod timing;
