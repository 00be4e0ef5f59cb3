use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::binder::Params;
use crate::command::{Command, RETURN_PARAMETER_NAME};
use crate::error::SqlResilienceError;
use crate::results::ResultSet;
use crate::types::{CommandKind, RowValues, SqlType};

/// Caller diagnostic appended to an escalated error as "Additional Debuginfo".
///
/// Receives the failed command, the result set if one was read before the
/// failure, and the error itself.
pub type OnException =
    Arc<dyn Fn(&Command, Option<&ResultSet>, &SqlResilienceError) -> String + Send + Sync>;

/// An output parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutParam {
    pub name: String,
    pub sql_type: Option<SqlType>,
    pub size: Option<usize>,
}

impl OutParam {
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: Option<SqlType>, size: Option<usize>) -> Self {
        Self {
            name: name.into(),
            sql_type,
            size,
        }
    }
}

/// The return-value slot declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnParam {
    pub sql_type: Option<SqlType>,
    pub size: Option<usize>,
}

impl ReturnParam {
    #[must_use]
    pub fn new(sql_type: Option<SqlType>, size: Option<usize>) -> Self {
        Self { sql_type, size }
    }
}

/// Which slot a scalar stored-procedure call reads its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Named(String),
    ReturnValue,
}

impl OutputTarget {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    #[must_use]
    pub fn return_value() -> Self {
        Self::ReturnValue
    }

    pub(crate) fn parameter_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::ReturnValue => RETURN_PARAMETER_NAME,
        }
    }
}

/// Everything one engine call needs besides the connection.
///
/// ```rust
/// use sql_resilience::prelude::*;
///
/// let request = Request::procedure("dbo.UpdateBalance")
///     .param("@AccountId", 42)
///     .param("@Delta", 10.5)
///     .out_param("@NewBalance", SqlType::Decimal, None)
///     .simple_transaction(true);
/// assert_eq!(request.kind(), CommandKind::StoredProcedure);
/// ```
#[derive(Clone)]
pub struct Request {
    text: String,
    kind: CommandKind,
    params: Params,
    out_params: Vec<OutParam>,
    return_param: Option<ReturnParam>,
    derive_parameters: bool,
    simple_transaction: bool,
    on_exception: Option<OnException>,
}

impl Request {
    /// A text command.
    pub fn query(sql: impl Into<String>) -> Self {
        Self::new(sql.into(), CommandKind::Text)
    }

    /// A stored-procedure command.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self::new(name.into(), CommandKind::StoredProcedure)
    }

    fn new(text: String, kind: CommandKind) -> Self {
        Self {
            text,
            kind,
            params: Params::default(),
            out_params: Vec::new(),
            return_param: None,
            derive_parameters: false,
            simple_transaction: false,
            on_exception: None,
        }
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.params.push(name, value);
        self
    }

    /// Append every pair of `params`, keeping order.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        for (name, value) in params.iter() {
            self.params.push(name, value.clone());
        }
        self
    }

    #[must_use]
    pub fn out_param(
        mut self,
        name: impl Into<String>,
        sql_type: SqlType,
        size: Option<usize>,
    ) -> Self {
        self.out_params
            .push(OutParam::new(name, Some(sql_type), size));
        self
    }

    /// Ask for the procedure's return value. Only valid on stored procedures;
    /// anything else fails with `InvalidCommandShape` before the driver is called.
    #[must_use]
    pub fn return_value(mut self, sql_type: SqlType, size: Option<usize>) -> Self {
        self.return_param = Some(ReturnParam::new(Some(sql_type), size));
        self
    }

    /// Fetch the procedure signature from the server before binding.
    ///
    /// Costs an extra round trip per attempt and replaces any parameters the
    /// adapter had already placed on the command.
    #[must_use]
    pub fn derive_parameters(mut self) -> Self {
        self.derive_parameters = true;
        self
    }

    /// Wrap execution in a transaction that is committed only on success.
    #[must_use]
    pub fn simple_transaction(mut self, enabled: bool) -> Self {
        self.simple_transaction = enabled;
        self
    }

    #[must_use]
    pub fn on_exception<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Command, Option<&ResultSet>, &SqlResilienceError) -> String + Send + Sync + 'static,
    {
        self.on_exception = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub(crate) fn out_params(&self) -> &[OutParam] {
        &self.out_params
    }

    pub(crate) fn return_param(&self) -> Option<&ReturnParam> {
        self.return_param.as_ref()
    }

    pub(crate) fn wants_derived_parameters(&self) -> bool {
        self.derive_parameters
    }

    pub(crate) fn wants_transaction(&self) -> bool {
        self.simple_transaction
    }

    pub(crate) fn exception_callback(&self) -> Option<&OnException> {
        self.on_exception.as_ref()
    }

    /// Make sure the slot a scalar procedure call reads from is declared.
    pub(crate) fn declare_output(mut self, output: &OutputTarget) -> Self {
        match output {
            OutputTarget::ReturnValue => {
                if self.return_param.is_none() {
                    self.return_param = Some(ReturnParam::new(None, None));
                }
            }
            OutputTarget::Named(name) => {
                let declared = self.out_params.iter().any(|o| {
                    crate::command::bare_name(&o.name)
                        .eq_ignore_ascii_case(crate::command::bare_name(name))
                });
                if !declared {
                    self.out_params.push(OutParam::new(name.clone(), None, None));
                }
            }
        }
        self
    }

    /// A fresh command for one attempt.
    pub(crate) fn command(&self, timeout: Option<Duration>) -> Command {
        let mut command = Command::new(self.text.clone(), self.kind);
        command.timeout = timeout;
        command
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("text", &self.text)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("out_params", &self.out_params)
            .field("return_param", &self.return_param)
            .field("derive_parameters", &self.derive_parameters)
            .field("simple_transaction", &self.simple_transaction)
            .field("on_exception", &self.on_exception.is_some())
            .finish()
    }
}
