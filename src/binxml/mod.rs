pub mod deserializer;
pub mod name;
pub mod name_cache;
pub mod tokens;
pub mod value_table;
pub mod value_variant;

pub(crate) mod element_stack;
