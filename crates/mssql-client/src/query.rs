//! Stored procedure arguments.

use mssql_types::{SqlValue, TypeInfo};
use tds_protocol::RpcParam;

/// One argument to [`Session::callproc`](crate::Session::callproc).
///
/// Arguments are positional unless named. The declared type is inferred
/// from the value unless given explicitly, which output parameters that
/// start out NULL usually need.
///
/// ```
/// use mssql_client::RpcArg;
/// use mssql_types::TypeInfo;
///
/// let args = vec![
///     RpcArg::new(42i32),
///     RpcArg::named("@total", None::<i32>)
///         .with_type(TypeInfo::int(4))
///         .output(),
/// ];
/// assert!(args[1].is_output());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RpcArg {
    name: Option<String>,
    value: SqlValue,
    type_info: Option<TypeInfo>,
    output: bool,
}

impl RpcArg {
    /// Positional input argument.
    pub fn new(value: impl Into<SqlValue>) -> Self {
        Self {
            name: None,
            value: value.into(),
            type_info: None,
            output: false,
        }
    }

    /// Named input argument; the `@` prefix is added when missing.
    pub fn named(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(value)
        }
    }

    /// Declare the parameter type instead of inferring it.
    #[must_use]
    pub fn with_type(mut self, type_info: TypeInfo) -> Self {
        self.type_info = Some(type_info);
        self
    }

    /// Mark as an output parameter.
    #[must_use]
    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    /// Check if this is an output parameter.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.output
    }

    pub(crate) fn into_param(self) -> RpcParam {
        let name = match self.name {
            Some(name) if name.starts_with('@') => name,
            Some(name) => format!("@{name}"),
            None => String::new(),
        };
        let param = match self.type_info {
            Some(type_info) => RpcParam::new(name, type_info, self.value),
            None => RpcParam::from_value(name, self.value),
        };
        if self.output { param.as_output() } else { param }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_argument() {
        let param = RpcArg::new(5i32).into_param();
        assert!(param.name.is_empty());
        assert!(!param.flags.by_ref);
        assert_eq!(param.value, SqlValue::Int(5));
        assert_eq!(param.type_info, TypeInfo::int(4));
    }

    #[test]
    fn test_named_output_argument() {
        let param = RpcArg::named("count", SqlValue::Null)
            .with_type(TypeInfo::int(8))
            .output()
            .into_param();
        assert_eq!(param.name, "@count");
        assert!(param.flags.by_ref);
        assert_eq!(param.type_info, TypeInfo::int(8));
    }

    #[test]
    fn test_string_argument() {
        let arg = RpcArg::named("@name", "abc");
        assert!(!arg.is_output());
        let param = arg.into_param();
        assert_eq!(param.name, "@name");
        assert_eq!(param.value, SqlValue::String("abc".into()));
    }
}
