//! Stored procedures are sent as one T-SQL batch. A call without output or
//! return slots is a bare `EXEC`, and its row count is the sum of the counts
//! the server reports for every statement:
//!
//! ```sql
//! EXEC [dbo].[CloseOrders] @Region = @P1;
//! ```
//!
//! Otherwise output values and the return value come back as a trailing
//! result set, and the row count is `@@ROWCOUNT` of the procedure's last
//! statement:
//!
//! ```sql
//! DECLARE @__rows INT;
//! DECLARE @__ret INT;
//! DECLARE @__out_Total BIGINT = @P2;
//! EXEC @__ret = [dbo].[UpdateTotals] @Id = @P1, @Total = @__out_Total OUTPUT;
//! SET @__rows = @@ROWCOUNT;
//! SELECT @__rows AS [__rows], @__ret AS [@RETURN_VALUE], @__out_Total AS [Total];
//! ```

use std::fmt::Write as _;

use super::params::tsql_type;
use crate::command::{Command, RETURN_PARAMETER_NAME};
use crate::results::ResultSet;
use crate::types::{ParameterDirection, RowValues};

pub(super) const ROWS_COLUMN: &str = "__rows";

/// Batch text plus the input values in `@Pn` order.
pub(super) struct ProcedureBatch {
    pub sql: String,
    pub inputs: Vec<RowValues>,
    /// The batch ends with the output row.
    pub selects_outputs: bool,
}

/// Bracket-quote every part of a (possibly schema-qualified) procedure name.
pub(super) fn quote_procedure_name(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let bare = part.trim().trim_start_matches('[').trim_end_matches(']');
            format!("[{}]", bare.replace(']', "]]"))
        })
        .collect::<Vec<_>>()
        .join(".")
}

pub(super) fn build_batch(command: &Command) -> ProcedureBatch {
    let has_return = command
        .parameters()
        .iter()
        .any(|p| p.direction == ParameterDirection::ReturnValue);
    let selects_outputs = command.parameters().iter().any(|p| p.direction.is_output());
    let mut declarations = String::from("DECLARE @__rows INT;\n");
    if has_return {
        declarations.push_str("DECLARE @__ret INT;\n");
    }
    let mut arguments = Vec::new();
    let mut selects = vec![format!("@__rows AS [{ROWS_COLUMN}]")];
    let mut inputs = Vec::new();

    for parameter in command.parameters() {
        let bare = parameter.bare_name();
        match parameter.direction {
            ParameterDirection::ReturnValue => {
                selects.push(format!("@__ret AS [{RETURN_PARAMETER_NAME}]"));
            }
            ParameterDirection::Input => {
                inputs.push(parameter.value.clone());
                arguments.push(format!("@{bare} = @P{}", inputs.len()));
            }
            ParameterDirection::Output | ParameterDirection::InputOutput => {
                let _ = write!(declarations, "DECLARE @__out_{bare} {}", tsql_type(parameter));
                if parameter.direction == ParameterDirection::InputOutput {
                    inputs.push(parameter.value.clone());
                    let _ = write!(declarations, " = @P{}", inputs.len());
                }
                declarations.push_str(";\n");
                arguments.push(format!("@{bare} = @__out_{bare} OUTPUT"));
                selects.push(format!("@__out_{bare} AS [{bare}]"));
            }
        }
    }

    let target = quote_procedure_name(&command.text);
    let exec = if has_return {
        format!("EXEC @__ret = {target}")
    } else {
        format!("EXEC {target}")
    };
    let args = if arguments.is_empty() {
        String::new()
    } else {
        format!(" {}", arguments.join(", "))
    };
    let sql = if selects_outputs {
        format!(
            "{declarations}{exec}{args};\nSET @__rows = @@ROWCOUNT;\nSELECT {};",
            selects.join(", ")
        )
    } else {
        format!("{exec}{args};")
    };
    ProcedureBatch {
        sql,
        inputs,
        selects_outputs,
    }
}

/// Row count of a bare `EXEC`: every statement's count, added up.
pub(super) fn total_rows_affected(counts: &[u64]) -> u64 {
    counts.iter().sum()
}

/// Copy the trailing output row back onto the command; returns the row count.
pub(super) fn apply_outputs(command: &mut Command, outputs: &ResultSet) -> u64 {
    let Some(row) = outputs.first() else {
        return 0;
    };
    let rows = row
        .get(ROWS_COLUMN)
        .and_then(RowValues::as_int)
        .and_then(|n| u64::try_from(*n).ok())
        .unwrap_or(0);
    let names: Vec<String> = command
        .parameters()
        .iter()
        .filter(|p| p.direction.is_output())
        .map(|p| p.name.clone())
        .collect();
    for name in names {
        let column = if name.eq_ignore_ascii_case(RETURN_PARAMETER_NAME) {
            RETURN_PARAMETER_NAME.to_string()
        } else {
            crate::command::bare_name(&name).to_string()
        };
        if let (Some(value), Some(parameter)) = (row.get(&column), command.parameter_mut(&name)) {
            parameter.value = value.clone();
        }
    }
    rows
}
