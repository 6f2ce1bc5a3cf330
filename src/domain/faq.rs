//! Frequently asked question records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::entity::impl_entity;
use super::error::DomainError;

const ENTITY: &str = "faq";

pub const QUESTION_MIN_CHARS: usize = 10;
pub const QUESTION_MAX_CHARS: usize = 500;
pub const ANSWER_MIN_CHARS: usize = 10;
pub const ANSWER_MAX_CHARS: usize = 2000;
pub const CATEGORY_MAX_CHARS: usize = 100;
pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faq {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub category: String,
    pub is_active: bool,
    pub priority: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl_entity!(Faq, Uuid);

impl Faq {
    /// Build an active FAQ with priority zero from trimmed input.
    pub fn new(question: &str, answer: &str, category: &str) -> Result<Self, DomainError> {
        let now = OffsetDateTime::now_utc();
        let faq = Self {
            id: Uuid::new_v4(),
            question: question.trim().to_string(),
            answer: answer.trim().to_string(),
            category: category.trim().to_string(),
            is_active: true,
            priority: PRIORITY_MIN,
            created_at: now,
            updated_at: now,
        };
        faq.validate()?;
        Ok(faq)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        check_length("question", &self.question, QUESTION_MIN_CHARS, QUESTION_MAX_CHARS)?;
        check_length("answer", &self.answer, ANSWER_MIN_CHARS, ANSWER_MAX_CHARS)?;
        check_length("category", &self.category, 1, CATEGORY_MAX_CHARS)?;
        check_priority(self.priority)
    }

    pub fn update_question(&mut self, question: &str) -> Result<(), DomainError> {
        self.question = question.trim().to_string();
        self.touch();
        self.validate()
    }

    pub fn update_answer(&mut self, answer: &str) -> Result<(), DomainError> {
        self.answer = answer.trim().to_string();
        self.touch();
        self.validate()
    }

    pub fn update_category(&mut self, category: &str) -> Result<(), DomainError> {
        self.category = category.trim().to_string();
        self.touch();
        self.validate()
    }

    /// Priority is left untouched when out of range.
    pub fn set_priority(&mut self, priority: i32) -> Result<(), DomainError> {
        check_priority(priority)?;
        self.priority = priority;
        self.touch();
        Ok(())
    }

    pub fn activate(&mut self) {
        self.is_active = true;
        self.touch();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.touch();
    }

    pub fn is_valid_for_publishing(&self) -> bool {
        self.is_active
            && !self.question.is_empty()
            && !self.answer.is_empty()
            && !self.category.is_empty()
    }

    /// Lowercased question, answer and category joined for substring search.
    pub fn searchable_text(&self) -> String {
        format!("{} {} {}", self.question, self.answer, self.category).to_lowercase()
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), DomainError> {
    let len = value.chars().count();
    if len == 0 {
        return Err(DomainError::validation(
            ENTITY,
            format!("{field} cannot be empty"),
        ));
    }
    if len < min {
        return Err(DomainError::validation(
            ENTITY,
            format!("{field} must be at least {min} characters long"),
        ));
    }
    if len > max {
        return Err(DomainError::validation(
            ENTITY,
            format!("{field} cannot exceed {max} characters"),
        ));
    }
    Ok(())
}

fn check_priority(priority: i32) -> Result<(), DomainError> {
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        return Err(DomainError::validation(
            ENTITY,
            format!("priority must be between {PRIORITY_MIN} and {PRIORITY_MAX}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::Entity;

    const QUESTION: &str = "What is a W-2 form and when is it issued?";
    const ANSWER: &str = "A W-2 reports annual wages and is issued by employers each January.";

    #[test]
    fn new_faq_is_active_with_zero_priority() {
        let faq = Faq::new(QUESTION, ANSWER, "forms").expect("valid faq");
        assert!(faq.is_active);
        assert_eq!(faq.priority, 0);
        assert_eq!(faq.created_at(), faq.updated_at());
        assert!(faq.is_valid_for_publishing());
    }

    #[test]
    fn new_faq_trims_input() {
        let faq = Faq::new(&format!("  {QUESTION}  "), ANSWER, "  forms ").expect("valid faq");
        assert_eq!(faq.question, QUESTION);
        assert_eq!(faq.category, "forms");
    }

    #[test]
    fn short_question_is_rejected() {
        let err = Faq::new("Why?", ANSWER, "forms").expect_err("question too short");
        assert!(matches!(err, DomainError::Validation { .. }));
        assert!(err.to_string().contains("question must be at least 10"));
    }

    #[test]
    fn empty_category_is_rejected() {
        let err = Faq::new(QUESTION, ANSWER, "   ").expect_err("category empty");
        assert!(err.to_string().contains("category cannot be empty"));
    }

    #[test]
    fn set_priority_checks_range() {
        let mut faq = Faq::new(QUESTION, ANSWER, "forms").expect("valid faq");
        faq.set_priority(50).expect("in range");
        assert_eq!(faq.priority, 50);

        assert!(faq.set_priority(101).is_err());
        assert!(faq.set_priority(-1).is_err());
        assert_eq!(faq.priority, 50);
    }

    #[test]
    fn deactivate_blocks_publishing() {
        let mut faq = Faq::new(QUESTION, ANSWER, "forms").expect("valid faq");
        faq.deactivate();
        assert!(!faq.is_valid_for_publishing());
        faq.activate();
        assert!(faq.is_valid_for_publishing());
    }

    #[test]
    fn searchable_text_is_lowercase() {
        let faq = Faq::new(QUESTION, ANSWER, "Forms").expect("valid faq");
        let text = faq.searchable_text();
        assert!(text.contains("w-2 form"));
        assert!(text.ends_with("forms"));
    }
}
