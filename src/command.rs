use std::time::Duration;

use crate::conversion::{FromRowValue, coerce};
use crate::error::SqlResilienceError;
use crate::types::{CommandKind, ParameterDirection, RowValues, SqlType};

/// Name under which the vendor-allocated return value is stored.
pub const RETURN_PARAMETER_NAME: &str = "@RETURN_VALUE";

/// One named parameter bound onto a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub struct DbParameter {
    pub name: String,
    pub direction: ParameterDirection,
    pub value: RowValues,
    pub size: Option<usize>,
    pub sql_type: Option<SqlType>,
}

impl DbParameter {
    #[must_use]
    pub fn new(name: impl Into<String>, size: Option<usize>, sql_type: Option<SqlType>) -> Self {
        Self {
            name: name.into(),
            direction: ParameterDirection::Input,
            value: RowValues::Null,
            size,
            sql_type,
        }
    }

    /// Parameter name without a leading `@` or `:`.
    #[must_use]
    pub fn bare_name(&self) -> &str {
        bare_name(&self.name)
    }
}

pub(crate) fn bare_name(name: &str) -> &str {
    name.trim_start_matches(['@', ':'])
}

fn same_name(a: &str, b: &str) -> bool {
    bare_name(a).eq_ignore_ascii_case(bare_name(b))
}

/// A command about to be sent, or just sent, to the driver.
///
/// Parameters keep their insertion order; that order is only used for
/// diagnostics and for positional placeholders generated by the adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub kind: CommandKind,
    pub timeout: Option<Duration>,
    parameters: Vec<DbParameter>,
}

impl Command {
    #[must_use]
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
            timeout: None,
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn parameters(&self) -> &[DbParameter] {
        &self.parameters
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&DbParameter> {
        self.parameters.iter().find(|p| same_name(&p.name, name))
    }

    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut DbParameter> {
        self.parameters.iter_mut().find(|p| same_name(&p.name, name))
    }

    /// Append a parameter.
    ///
    /// # Errors
    /// `InvalidParameter` when a parameter with the same name is already bound.
    pub fn add_parameter(&mut self, parameter: DbParameter) -> Result<(), SqlResilienceError> {
        if self.parameter(&parameter.name).is_some() {
            return Err(SqlResilienceError::InvalidParameter(format!(
                "parameter {} is already bound on the command",
                parameter.name
            )));
        }
        self.parameters.push(parameter);
        Ok(())
    }

    /// Insert the return-value slot at index 0.
    pub(crate) fn insert_first(&mut self, parameter: DbParameter) {
        self.parameters.insert(0, parameter);
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Input values in binding order, skipping pure output slots.
    pub fn input_values(&self) -> impl Iterator<Item = &DbParameter> {
        self.parameters.iter().filter(|p| {
            matches!(
                p.direction,
                ParameterDirection::Input | ParameterDirection::InputOutput
            )
        })
    }

    /// Read back an output, input/output or return parameter.
    ///
    /// # Errors
    /// `InvalidParameter` when the name is unknown or the parameter is input-only;
    /// `InvalidConversion` when the value cannot become a `T`.
    pub fn output_value<T: FromRowValue>(&self, name: &str) -> Result<T, SqlResilienceError> {
        let parameter = self.parameter(name).ok_or_else(|| {
            SqlResilienceError::InvalidParameter(format!(
                "output parameter {name} does not exist on the command"
            ))
        })?;
        if !parameter.direction.is_output() {
            return Err(SqlResilienceError::InvalidParameter(format!(
                "parameter {name} is not an output parameter"
            )));
        }
        coerce::<T>(&parameter.value)
    }

    /// The value the server wrote into the return-value slot.
    ///
    /// # Errors
    /// See [`Command::output_value`].
    pub fn return_value<T: FromRowValue>(&self) -> Result<T, SqlResilienceError> {
        self.output_value(RETURN_PARAMETER_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_prefix_and_case() {
        let mut cmd = Command::new("dbo.Foo", CommandKind::StoredProcedure);
        cmd.add_parameter(DbParameter::new("@UserId", None, None)).unwrap();
        assert!(cmd.parameter("userid").is_some());
        assert!(cmd.parameter(":USERID").is_some());
        assert!(cmd.parameter("other").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut cmd = Command::new("dbo.Foo", CommandKind::StoredProcedure);
        cmd.add_parameter(DbParameter::new("@a", None, None)).unwrap();
        let err = cmd.add_parameter(DbParameter::new("A", None, None)).unwrap_err();
        assert!(matches!(err, SqlResilienceError::InvalidParameter(_)));
    }

    #[test]
    fn output_value_requires_output_direction() {
        let mut cmd = Command::new("dbo.Foo", CommandKind::StoredProcedure);
        let mut input = DbParameter::new("@in", None, None);
        input.value = RowValues::Int(3);
        cmd.add_parameter(input).unwrap();
        let mut out = DbParameter::new("@out", None, Some(SqlType::Int));
        out.direction = ParameterDirection::Output;
        out.value = RowValues::Int(9);
        cmd.add_parameter(out).unwrap();

        assert_eq!(cmd.output_value::<i64>("out").unwrap(), 9);
        assert!(matches!(
            cmd.output_value::<i64>("@in"),
            Err(SqlResilienceError::InvalidParameter(_))
        ));
        assert!(matches!(
            cmd.output_value::<i64>("@missing"),
            Err(SqlResilienceError::InvalidParameter(_))
        ));
    }
}
