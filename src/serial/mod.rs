//! XML serialization.
//!
//! Serializes a `Document` tree back to UTF-8 XML text, pretty-printed by
//! default.

pub mod xml;

pub use xml::{render, serialize, serialize_with_options, SerializeOptions};
