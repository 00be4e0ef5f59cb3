//! Parameter binding: wire formatting, input/output/return slots.

use lazy_static::lazy_static;
use regex::Regex;

use crate::adapter::VendorAdapter;
use crate::command::{Command, RETURN_PARAMETER_NAME};
use crate::error::SqlResilienceError;
use crate::logging::EventLog;
use crate::request::{OutParam, Request, ReturnParam};
use crate::types::{CommandKind, ParameterDirection, RowValues};

lazy_static! {
    // Names are spliced into generated EXEC/CALL text, so they must be plain identifiers.
    static ref PARAMETER_NAME: Regex = Regex::new(r"^[@:]?[A-Za-z_][A-Za-z0-9_$#]*$")
        .expect("parameter name pattern compiles");
}

/// Ordered `(name, value)` input pairs.
///
/// ```rust
/// use sql_resilience::prelude::*;
///
/// let params: Params = [("@id", RowValues::Int(7)), ("@name", "ann".into())]
///     .into_iter()
///     .collect();
/// assert_eq!(params.render(), "@id = 7, @name = ann");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pairs: Vec<(String, RowValues)>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<RowValues>) {
        self.pairs.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `name = value, ...` in call order.
    #[must_use]
    pub fn render(&self) -> String {
        render_pairs(&self.pairs).join(", ")
    }
}

impl<N: Into<String>, V: Into<RowValues>> FromIterator<(N, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

fn render_pairs(pairs: &[(String, RowValues)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(n, v)| format!("{n} = {}", v.display_value()))
        .collect()
}

/// Normalize a value before it is bound.
///
/// Nulls are rejected; pass the type's default instead. Booleans become 1/0.
/// Everything else, the empty string included, is passed through.
///
/// # Errors
/// `InvalidParameter` for `RowValues::Null`.
pub fn format_for_wire(name: &str, value: &RowValues) -> Result<RowValues, SqlResilienceError> {
    match value {
        RowValues::Null => Err(SqlResilienceError::InvalidParameter(format!(
            "null value supplied for parameter {name}; pass the type's default value instead"
        ))),
        RowValues::Bool(b) => Ok(RowValues::Int(i64::from(*b))),
        other => Ok(other.clone()),
    }
}

fn check_name(name: &str) -> Result<(), SqlResilienceError> {
    if PARAMETER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(SqlResilienceError::InvalidParameter(format!(
            "parameter name {name:?} is not a valid identifier"
        )))
    }
}

/// Binds a [`Request`]'s parameters onto a [`Command`] through the adapter.
pub struct ParameterBinder<'a, A: VendorAdapter + ?Sized> {
    adapter: &'a A,
    log: &'a dyn EventLog,
}

impl<'a, A: VendorAdapter + ?Sized> ParameterBinder<'a, A> {
    pub fn new(adapter: &'a A, log: &'a dyn EventLog) -> Self {
        Self { adapter, log }
    }

    /// Bind inputs, then outputs, then the return slot.
    ///
    /// # Errors
    /// See the individual `insert_*` methods.
    pub fn bind(&self, command: &mut Command, request: &Request) -> Result<(), SqlResilienceError> {
        self.insert_in_params(command, request.params())?;
        self.insert_out_params(command, request.out_params())?;
        if let Some(ret) = request.return_param() {
            self.insert_return_parameter(command, ret)?;
        }
        Ok(())
    }

    /// Assign input values, reusing parameters already on the command (for
    /// example derived ones) and creating the rest through the adapter.
    ///
    /// On failure the pairs attempted so far are logged before the error is
    /// returned.
    ///
    /// # Errors
    /// `InvalidParameter` for null values, bad names or duplicates.
    pub fn insert_in_params(
        &self,
        command: &mut Command,
        params: &Params,
    ) -> Result<(), SqlResilienceError> {
        for (idx, (name, value)) in params.pairs.iter().enumerate() {
            if let Err(err) = self.insert_in_param(command, name, value) {
                let attempted = render_pairs(&params.pairs[..=idx]);
                self.log
                    .log_exception(&err, "Parameter binding failed", &attempted);
                return Err(err);
            }
        }
        Ok(())
    }

    fn insert_in_param(
        &self,
        command: &mut Command,
        name: &str,
        value: &RowValues,
    ) -> Result<(), SqlResilienceError> {
        check_name(name)?;
        let value = format_for_wire(name, value)?;
        if let Some(existing) = command.parameter_mut(name) {
            if existing.direction == ParameterDirection::Output {
                existing.direction = ParameterDirection::InputOutput;
            }
            existing.value = value;
            return Ok(());
        }
        let mut parameter = self.adapter.create_parameter(name, None, None);
        parameter.value = value;
        command.add_parameter(parameter)
    }

    /// Declare output parameters. An existing parameter is promoted: to
    /// `InputOutput` when it already carries an input value, to `Output`
    /// otherwise.
    ///
    /// # Errors
    /// `InvalidParameter` for bad names.
    pub fn insert_out_params(
        &self,
        command: &mut Command,
        outs: &[OutParam],
    ) -> Result<(), SqlResilienceError> {
        for out in outs {
            if let Err(err) = self.insert_out_param(command, out) {
                let attempted: Vec<String> = outs.iter().map(|o| o.name.clone()).collect();
                self.log
                    .log_exception(&err, "Output parameter binding failed", &attempted);
                return Err(err);
            }
        }
        Ok(())
    }

    fn insert_out_param(&self, command: &mut Command, out: &OutParam) -> Result<(), SqlResilienceError> {
        check_name(&out.name)?;
        if let Some(existing) = command.parameter_mut(&out.name) {
            existing.direction = match existing.direction {
                ParameterDirection::Input if !existing.value.is_null() => {
                    ParameterDirection::InputOutput
                }
                ParameterDirection::InputOutput => ParameterDirection::InputOutput,
                _ => ParameterDirection::Output,
            };
            if out.size.is_some() {
                existing.size = out.size;
            }
            if out.sql_type.is_some() {
                existing.sql_type = out.sql_type;
            }
            return Ok(());
        }
        let mut parameter = self
            .adapter
            .create_parameter(&out.name, out.size, out.sql_type);
        parameter.direction = ParameterDirection::Output;
        command.add_parameter(parameter)
    }

    /// Allocate the return-value slot at index 0.
    ///
    /// # Errors
    /// `InvalidCommandShape` unless the command is a stored procedure.
    pub fn insert_return_parameter(
        &self,
        command: &mut Command,
        ret: &ReturnParam,
    ) -> Result<(), SqlResilienceError> {
        if command.kind != CommandKind::StoredProcedure {
            return Err(SqlResilienceError::InvalidCommandShape(format!(
                "return parameter requested on a {:?} command; only stored procedures have return values",
                command.kind
            )));
        }
        if let Some(existing) = command.parameter_mut(RETURN_PARAMETER_NAME) {
            existing.direction = ParameterDirection::ReturnValue;
            existing.size = ret.size.or(existing.size);
            existing.sql_type = ret.sql_type.or(existing.sql_type);
            return Ok(());
        }
        let mut parameter =
            self.adapter
                .create_parameter(RETURN_PARAMETER_NAME, ret.size, ret.sql_type);
        parameter.direction = ParameterDirection::ReturnValue;
        command.insert_first(parameter);
        Ok(())
    }
}
