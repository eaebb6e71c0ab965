pub mod richtext_helpers;
pub mod sanitization_helpers;
