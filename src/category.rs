//! Submission categories and their field schemas
//!
//! Every category maps to one pending table, one permanent table and a fixed
//! set of fields. Intake code validates against these schemas before anything
//! reaches the staging area.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Submission type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Academic,
    Popular,
    Competition,
    Award,
    Research,
    Publication,
    Summary,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Academic,
        Category::Popular,
        Category::Competition,
        Category::Award,
        Category::Research,
        Category::Publication,
        Category::Summary,
    ];

    /// Short slug used in table names and object paths
    pub fn slug(self) -> &'static str {
        match self {
            Category::Academic => "academic",
            Category::Popular => "popular",
            Category::Competition => "competition",
            Category::Award => "award",
            Category::Research => "research",
            Category::Publication => "publication",
            Category::Summary => "summary",
        }
    }

    pub fn pending_table(self) -> &'static str {
        match self {
            Category::Academic => "pending_academic",
            Category::Popular => "pending_popular",
            Category::Competition => "pending_competition",
            Category::Award => "pending_award",
            Category::Research => "pending_research",
            Category::Publication => "pending_publication",
            Category::Summary => "pending_summary",
        }
    }

    pub fn committed_table(self) -> &'static str {
        self.schema().table
    }

    pub fn schema(self) -> &'static CategorySchema {
        match self {
            Category::Academic => &ACADEMIC,
            Category::Popular => &POPULAR,
            Category::Competition => &COMPETITION,
            Category::Award => &AWARD,
            Category::Research => &RESEARCH,
            Category::Publication => &PUBLICATION,
            Category::Summary => &SUMMARY,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.slug() == s || c.committed_table() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// Value type of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// ISO date, `YYYY-MM-DD`
    Date,
    /// Decimal number strictly greater than zero
    PositiveNumber,
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, required: true }
    }

    const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, required: false }
    }

    /// Check a non-empty value against the field kind
    pub fn check(&self, value: &str) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidValue {
            field: self.name.to_string(),
            reason,
        };

        match self.kind {
            FieldKind::Text => Ok(()),
            FieldKind::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|_| ())
                .map_err(|e| invalid(format!("expected YYYY-MM-DD: {}", e))),
            FieldKind::PositiveNumber => match value.parse::<f64>() {
                Ok(n) if n.is_finite() && n > 0.0 => Ok(()),
                Ok(_) => Err(invalid("must be greater than zero".to_string())),
                Err(e) => Err(invalid(e.to_string())),
            },
            FieldKind::Choice(options) => {
                if options.contains(&value) {
                    Ok(())
                } else {
                    Err(invalid(format!("expected one of {}", options.join(", "))))
                }
            }
        }
    }
}

/// Attachment slots a category accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSlots {
    None,
    Images { max: usize },
    /// Exactly one word-processor document
    Document,
}

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png"];
const DOCUMENT_TYPES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

impl AttachmentSlots {
    pub fn max(self) -> usize {
        match self {
            AttachmentSlots::None => 0,
            AttachmentSlots::Images { max } => max,
            AttachmentSlots::Document => 1,
        }
    }

    pub fn accepts(self, mime_type: &str) -> bool {
        match self {
            AttachmentSlots::None => false,
            AttachmentSlots::Images { .. } => IMAGE_TYPES.contains(&mime_type),
            AttachmentSlots::Document => DOCUMENT_TYPES.contains(&mime_type),
        }
    }

    /// Whether materialized attachments go to the document bucket
    pub fn is_document(self) -> bool {
        matches!(self, AttachmentSlots::Document)
    }
}

/// Field schema for one category
#[derive(Debug)]
pub struct CategorySchema {
    pub category: Category,
    /// Permanent table name
    pub table: &'static str,
    /// Field naming the item; used to derive object paths
    pub title_field: &'static str,
    pub fields: &'static [FieldSpec],
    pub attachments: AttachmentSlots,
}

impl CategorySchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

use FieldKind::{Date, PositiveNumber, Text};

const ACTIVITY_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("activity_date", Date),
    FieldSpec::required("activity_name", Text),
    FieldSpec::required("description", Text),
];

static ACADEMIC: CategorySchema = CategorySchema {
    category: Category::Academic,
    table: "academic_activities",
    title_field: "activity_name",
    fields: ACTIVITY_FIELDS,
    attachments: AttachmentSlots::Images { max: 3 },
};

static POPULAR: CategorySchema = CategorySchema {
    category: Category::Popular,
    table: "popular_activities",
    title_field: "activity_name",
    fields: ACTIVITY_FIELDS,
    attachments: AttachmentSlots::Images { max: 3 },
};

static COMPETITION: CategorySchema = CategorySchema {
    category: Category::Competition,
    table: "competitions",
    title_field: "competition_name",
    fields: &[
        FieldSpec::required("competition_date", Date),
        FieldSpec::required("competition_name", Text),
        FieldSpec::required("description", Text),
    ],
    attachments: AttachmentSlots::Images { max: 3 },
};

static AWARD: CategorySchema = CategorySchema {
    category: Category::Award,
    table: "awards",
    title_field: "award_name",
    fields: &[
        FieldSpec::required("award_date", Date),
        FieldSpec::required("award_name", Text),
        FieldSpec::required("award_organization", Text),
    ],
    attachments: AttachmentSlots::Images { max: 3 },
};

static RESEARCH: CategorySchema = CategorySchema {
    category: Category::Research,
    table: "research_projects",
    title_field: "project_name",
    fields: &[
        FieldSpec::required("project_leader", Text),
        FieldSpec::required("project_name", Text),
        FieldSpec::required("project_unit", Text),
        FieldSpec::required("fund_name", Text),
        FieldSpec::required("fund_number", Text),
        FieldSpec::required("fund_amount", PositiveNumber),
        FieldSpec::required("project_date", Date),
    ],
    attachments: AttachmentSlots::None,
};

pub const PUBLICATION_TYPES: &[&str] = &["paper", "monograph", "patent"];
pub const PUBLICATION_LEVELS: &[&str] = &["sci", "core", "sci_tech_core", "provincial", "other"];

static PUBLICATION: CategorySchema = CategorySchema {
    category: Category::Publication,
    table: "publications",
    title_field: "title",
    fields: &[
        FieldSpec::required("publication_type", FieldKind::Choice(PUBLICATION_TYPES)),
        FieldSpec::required("title", Text),
        FieldSpec::required("journal", Text),
        FieldSpec::optional("cn_number", Text),
        FieldSpec::optional("department", Text),
        FieldSpec::optional("issue", Text),
        FieldSpec::optional("pages", Text),
        FieldSpec::required("author", Text),
        FieldSpec::required("level", FieldKind::Choice(PUBLICATION_LEVELS)),
        FieldSpec::required("publication_date", Date),
    ],
    attachments: AttachmentSlots::None,
};

static SUMMARY: CategorySchema = CategorySchema {
    category: Category::Summary,
    table: "summary_documents",
    title_field: "original_filename",
    fields: &[FieldSpec::required("original_filename", Text)],
    attachments: AttachmentSlots::Document,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_distinct() {
        let mut names: Vec<&str> = Category::ALL
            .iter()
            .flat_map(|c| [c.pending_table(), c.committed_table()])
            .collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Category::ALL.len() * 2);
    }

    #[test]
    fn test_parse_category() {
        assert_eq!("academic".parse::<Category>().unwrap(), Category::Academic);
        assert_eq!("research_projects".parse::<Category>().unwrap(), Category::Research);
        assert!("unknown".parse::<Category>().is_err());
    }

    #[test]
    fn test_field_kinds() {
        let schema = Category::Research.schema();
        let amount = schema.field("fund_amount").unwrap();
        assert!(amount.check("1.5").is_ok());
        assert!(amount.check("0").is_err());
        assert!(amount.check("lots").is_err());

        let date = schema.field("project_date").unwrap();
        assert!(date.check("2025-03-01").is_ok());
        assert!(date.check("03/01/2025").is_err());

        let level = Category::Publication.schema().field("level").unwrap();
        assert!(level.check("sci").is_ok());
        assert!(level.check("").is_err());
    }

    #[test]
    fn test_attachment_slots() {
        assert_eq!(Category::Academic.schema().attachments.max(), 3);
        assert_eq!(Category::Research.schema().attachments.max(), 0);
        assert!(Category::Award.schema().attachments.accepts("image/png"));
        assert!(!Category::Award.schema().attachments.accepts("application/pdf"));
        assert!(Category::Summary.schema().attachments.is_document());
    }
}
