//! Domain layer types and invariants.

pub mod entity;
pub mod error;
pub mod faq;
pub mod testimonial;
