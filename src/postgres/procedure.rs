//! Routine calls generated from a stored-procedure command.
//!
//! Arguments use named notation so the order of declared parameters does not
//! matter:
//!
//! ```sql
//! CALL public.update_totals("id" => $1, "total" => $2::bigint, "message" => NULL::varchar);
//! SELECT * FROM public.next_id("seed" => $1) AS "@RETURN_VALUE";
//! ```

use lazy_static::lazy_static;
use regex::Regex;

use super::params::{pg_type, placeholder};
use crate::command::{Command, RETURN_PARAMETER_NAME, bare_name};
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::{ParameterDirection, RowValues};

lazy_static! {
    static ref ROUTINE_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$")
            .expect("routine name pattern compiles");
}

/// How a routine is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CallShape {
    /// `CALL`; OUT and INOUT values come back as one row.
    Procedure,
    /// `SELECT * FROM f(...) AS "@RETURN_VALUE"`; a scalar result lands in the
    /// return slot, OUT columns in the matching outputs.
    Function,
    /// `SELECT * FROM f(...)`; the rows are the result set.
    Rows,
}

impl CallShape {
    pub(super) fn for_command(command: &Command, reader: bool) -> Self {
        if reader {
            Self::Rows
        } else if command
            .parameters()
            .iter()
            .any(|p| p.direction == ParameterDirection::ReturnValue)
        {
            Self::Function
        } else {
            Self::Procedure
        }
    }
}

/// Statement text plus the input values in `$n` order.
#[derive(Debug)]
pub(super) struct RoutineCall {
    pub sql: String,
    pub inputs: Vec<RowValues>,
}

/// Split `schema.name` into its parts.
pub(super) fn split_routine_name(name: &str) -> Result<(Option<&str>, &str), SqlResilienceError> {
    let name = name.trim();
    if !ROUTINE_NAME.is_match(name) {
        return Err(SqlResilienceError::InvalidCommandShape(format!(
            "{name:?} is not a plain routine name"
        )));
    }
    Ok(match name.split_once('.') {
        Some((schema, routine)) => (Some(schema), routine),
        None => (None, name),
    })
}

/// Double-quote an argument name. Derived names keep their case and may hold
/// characters a bare identifier cannot.
pub(super) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(super) fn build_call(command: &Command, shape: CallShape) -> Result<RoutineCall, SqlResilienceError> {
    split_routine_name(&command.text)?;
    let mut arguments = Vec::new();
    let mut inputs = Vec::new();

    for parameter in command.parameters() {
        let bare = quote_ident(parameter.bare_name());
        match parameter.direction {
            ParameterDirection::ReturnValue => {}
            ParameterDirection::Input | ParameterDirection::InputOutput => {
                inputs.push(parameter.value.clone());
                arguments.push(format!(
                    "{bare} => {}",
                    placeholder(inputs.len(), parameter.sql_type)
                ));
            }
            // functions take no OUT arguments; procedures want a NULL placeholder
            ParameterDirection::Output if shape == CallShape::Procedure => {
                let slot = parameter
                    .sql_type
                    .map_or_else(|| "NULL".to_string(), |t| format!("NULL::{}", pg_type(t)));
                arguments.push(format!("{bare} => {slot}"));
            }
            ParameterDirection::Output => {}
        }
    }

    let target = command.text.trim();
    let args = arguments.join(", ");
    let sql = match shape {
        CallShape::Procedure => format!("CALL {target}({args})"),
        CallShape::Function => {
            format!("SELECT * FROM {target}({args}) AS \"{RETURN_PARAMETER_NAME}\"")
        }
        CallShape::Rows => format!("SELECT * FROM {target}({args})"),
    };
    Ok(RoutineCall { sql, inputs })
}

/// Copy the first returned row onto the output and return slots.
///
/// Columns carry the unquoted argument names; an exact match wins over a
/// case-insensitive one.
pub(super) fn apply_outputs(command: &mut Command, outputs: &ResultSet) {
    let Some(row) = outputs.first() else {
        return;
    };
    let names: Vec<String> = command
        .parameters()
        .iter()
        .filter(|p| p.direction.is_output())
        .map(|p| p.name.clone())
        .collect();
    for name in names {
        let column = if name.eq_ignore_ascii_case(RETURN_PARAMETER_NAME) {
            RETURN_PARAMETER_NAME
        } else {
            bare_name(&name)
        };
        if let (Some(value), Some(parameter)) = (row.get(column), command.parameter_mut(&name)) {
            parameter.value = value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DbParameter;
    use crate::types::{CommandKind, SqlType};

    fn command() -> Command {
        let mut cmd = Command::new("public.update_totals", CommandKind::StoredProcedure);
        let mut id = DbParameter::new("@id", None, None);
        id.value = RowValues::Int(7);
        cmd.add_parameter(id).unwrap();
        let mut total = DbParameter::new("@total", None, Some(SqlType::Decimal));
        total.direction = ParameterDirection::InputOutput;
        total.value = RowValues::Float(1.5);
        cmd.add_parameter(total).unwrap();
        let mut message = DbParameter::new("@message", None, Some(SqlType::VarChar));
        message.direction = ParameterDirection::Output;
        cmd.add_parameter(message).unwrap();
        cmd
    }

    #[test]
    fn procedures_pass_null_for_outputs() {
        let cmd = command();
        assert_eq!(CallShape::for_command(&cmd, false), CallShape::Procedure);
        let call = build_call(&cmd, CallShape::Procedure).unwrap();
        assert_eq!(
            call.sql,
            "CALL public.update_totals(\"id\" => $1, \"total\" => $2::numeric, \"message\" => NULL::varchar)"
        );
        assert_eq!(call.inputs, vec![RowValues::Int(7), RowValues::Float(1.5)]);
    }

    #[test]
    fn return_slot_selects_from_the_function() {
        let mut cmd = command();
        let mut ret = DbParameter::new(RETURN_PARAMETER_NAME, None, Some(SqlType::Int));
        ret.direction = ParameterDirection::ReturnValue;
        cmd.insert_first(ret);
        assert_eq!(CallShape::for_command(&cmd, false), CallShape::Function);
        let call = build_call(&cmd, CallShape::Function).unwrap();
        assert_eq!(
            call.sql,
            "SELECT * FROM public.update_totals(\"id\" => $1, \"total\" => $2::numeric) AS \"@RETURN_VALUE\""
        );
    }

    #[test]
    fn reader_calls_select_rows() {
        let cmd = command();
        assert_eq!(CallShape::for_command(&cmd, true), CallShape::Rows);
        let call = build_call(&cmd, CallShape::Rows).unwrap();
        assert!(call.sql.starts_with("SELECT * FROM public.update_totals(\"id\" => $1"));
    }

    #[test]
    fn injection_shaped_routine_names_are_rejected() {
        let cmd = Command::new("f(); DROP TABLE t; --", CommandKind::StoredProcedure);
        assert!(matches!(
            build_call(&cmd, CallShape::Procedure),
            Err(SqlResilienceError::InvalidCommandShape(_))
        ));
        assert_eq!(split_routine_name("app.f").unwrap(), (Some("app"), "f"));
        assert_eq!(split_routine_name("f").unwrap(), (None, "f"));
    }

    #[test]
    fn outputs_are_written_back() {
        let mut cmd = command();
        let outputs = ResultSet::from_rows(
            vec!["total".into(), "message".into()],
            vec![vec![RowValues::Float(9.25), RowValues::Text("ok".into())]],
        );
        apply_outputs(&mut cmd, &outputs);
        assert_eq!(cmd.output_value::<f64>("@total").unwrap(), 9.25);
        assert_eq!(cmd.output_value::<String>("@message").unwrap(), "ok");
    }

    #[test]
    fn derived_names_are_quoted_and_read_back() {
        let mut cmd = Command::new("public.p", CommandKind::StoredProcedure);
        let mut account = DbParameter::new("AccountId", None, Some(SqlType::Int));
        account.value = RowValues::Int(3);
        cmd.add_parameter(account).unwrap();
        let mut amount = DbParameter::new("net amount", None, None);
        amount.value = RowValues::Float(2.5);
        cmd.add_parameter(amount).unwrap();
        let mut odd = DbParameter::new("say\"hi", None, None);
        odd.direction = ParameterDirection::Output;
        cmd.add_parameter(odd).unwrap();
        let mut balance = DbParameter::new("NewBalance", None, Some(SqlType::Decimal));
        balance.direction = ParameterDirection::Output;
        cmd.add_parameter(balance).unwrap();

        let call = build_call(&cmd, CallShape::Procedure).unwrap();
        assert_eq!(
            call.sql,
            "CALL public.p(\"AccountId\" => $1::integer, \"net amount\" => $2, \"say\"\"hi\" => NULL, \"NewBalance\" => NULL::numeric)"
        );

        let outputs = ResultSet::from_rows(
            vec!["say\"hi".into(), "NewBalance".into()],
            vec![vec![RowValues::Text("x".into()), RowValues::Float(7.25)]],
        );
        apply_outputs(&mut cmd, &outputs);
        assert_eq!(cmd.output_value::<String>("say\"hi").unwrap(), "x");
        assert_eq!(cmd.output_value::<f64>("NewBalance").unwrap(), 7.25);
    }
}
