pub mod mime;
pub mod money;
pub mod sanitize;
