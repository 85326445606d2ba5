//! Schema inference and reconciliation.
//!
//! A batch is typed by joining the inferred type of every value per field.
//! The result is compared against the destination schema to decide, per
//! field, whether values can be stored as-is, need a cast, require the
//! column to be added or widened, or conflict with the declared shape.

mod conform;
mod inference;
mod reconcile;
mod types;

pub use conform::{Violation, conform_record, conform_value};
pub use inference::{BatchTypes, Observed, infer_type, join};
pub use reconcile::{FieldPlan, ReconciliationPlan, SchemaChange, reconcile};
pub use types::{FieldType, TableSchema};
