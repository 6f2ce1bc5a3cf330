//! Application services layer.

pub mod error;
pub mod faqs;
pub mod query;
pub mod repos;
pub mod testimonials;
