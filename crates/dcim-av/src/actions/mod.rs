//! Media processing actions.

mod iphone;

pub use iphone::{convert_for_iphone, ConversionParams};
