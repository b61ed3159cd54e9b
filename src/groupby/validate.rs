//! Validation of grouping and target columns against a table schema.

use crate::error::{Error, Result};
use crate::groupby::compiler::GroupSpec;
use crate::schema::{Field, TableSchema};

/// Validate the grouping columns.
///
/// Every unknown column is reported at once. A column named twice is kept
/// once, at its first position.
pub fn validate_by(by: Option<&[String]>, schema: &TableSchema, dropna: bool) -> Result<GroupSpec> {
    let by = match by {
        Some(by) if !by.is_empty() => by,
        _ => return Err(Error::MissingParameter("by".into())),
    };

    let fields = resolve_columns(by, schema)?;
    for field in &fields {
        if !field.is_aggregatable() {
            return Err(Error::IncompatibleType {
                column: field.name.clone(),
                function: "groupby".into(),
                field_type: field.field_type.to_string(),
            });
        }
    }

    Ok(GroupSpec { fields, dropna })
}

/// Target columns of an aggregation: the explicit selection, or every column
/// of the table that is not a grouping column.
pub fn validate_targets(
    selection: Option<&[String]>,
    schema: &TableSchema,
    group: &GroupSpec,
) -> Result<Vec<Field>> {
    let is_group = |name: &str| group.fields.iter().any(|f| f.name == name);
    match selection {
        Some(columns) => Ok(resolve_columns(columns, schema)?
            .into_iter()
            .filter(|f| !is_group(&f.name))
            .collect()),
        None => Ok(schema
            .fields()
            .iter()
            .filter(|f| !is_group(&f.name))
            .cloned()
            .collect()),
    }
}

fn resolve_columns(columns: &[String], schema: &TableSchema) -> Result<Vec<Field>> {
    let selected = schema.select(columns)?;
    Ok(selected.fields().to_vec())
}
