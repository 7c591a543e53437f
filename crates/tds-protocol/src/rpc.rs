//! RPC (Remote Procedure Call) request encoding.
//!
//! RPC requests (packet type 0x03) call stored procedures, either by name or
//! by the numeric id of a built-in procedure such as `sp_executesql`.
//!
//! ## Wire Format
//!
//! ```text
//! +-------------------+
//! | ALL_HEADERS       |
//! +-------------------+
//! | ProcName/ProcID   | US_VARCHAR name, or 0xFFFF + u16 id
//! +-------------------+
//! | Option Flags      | (2 bytes)
//! +-------------------+
//! | Parameters        | name, status, TYPE_INFO, value (repeated)
//! +-------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use mssql_types::{SqlValue, TypeInfo, encode_value};

use crate::codec::{write_all_headers, write_b_varchar, write_us_varchar};
use crate::error::ProtocolError;

/// Marker in place of the procedure name length for by-id calls.
const PROC_ID_SWITCH: u16 = 0xFFFF;

/// Well-known stored procedure IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_executesql (0x000A), the carrier for parameterized queries.
    ExecuteSql = 0x000A,
    /// sp_prepare (0x000B)
    Prepare = 0x000B,
    /// sp_execute (0x000C)
    Execute = 0x000C,
    /// sp_prepexec (0x000D)
    PrepExec = 0x000D,
    /// sp_unprepare (0x000F)
    Unprepare = 0x000F,
}

/// RPC option flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcOptionFlags {
    /// Recompile the procedure.
    pub with_recompile: bool,
    /// No metadata in response.
    pub no_metadata: bool,
}

impl RpcOptionFlags {
    /// Encode to wire format (2 bytes).
    #[must_use]
    pub fn encode(&self) -> u16 {
        let mut flags = 0u16;
        if self.with_recompile {
            flags |= 0x0001;
        }
        if self.no_metadata {
            flags |= 0x0002;
        }
        flags
    }
}

/// RPC parameter status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamFlags {
    /// Parameter is passed by reference (OUTPUT parameter).
    pub by_ref: bool,
    /// Use the procedure's default value.
    pub default: bool,
}

impl ParamFlags {
    /// Encode to wire format (1 byte).
    #[must_use]
    pub fn encode(&self) -> u8 {
        let mut flags = 0u8;
        if self.by_ref {
            flags |= 0x01;
        }
        if self.default {
            flags |= 0x02;
        }
        flags
    }
}

/// An RPC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParam {
    /// Parameter name, including the leading `@`, or empty for positional.
    pub name: String,
    /// Status flags.
    pub flags: ParamFlags,
    /// Declared type.
    pub type_info: TypeInfo,
    /// Parameter value.
    pub value: SqlValue,
}

impl RpcParam {
    /// Create a parameter with an explicit type.
    pub fn new(name: impl Into<String>, type_info: TypeInfo, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            flags: ParamFlags::default(),
            type_info,
            value,
        }
    }

    /// Create a parameter whose type is inferred from the value.
    pub fn from_value(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        Self::new(name, TypeInfo::for_value(&value), value)
    }

    /// Create an NVARCHAR parameter sized to fit `value`.
    pub fn nvarchar(name: impl Into<String>, value: &str) -> Self {
        Self::from_value(name, value)
    }

    /// Mark as output parameter.
    #[must_use]
    pub fn as_output(mut self) -> Self {
        self.flags.by_ref = true;
        self
    }

    /// Encode the parameter.
    ///
    /// The value is checked against the declared type; a value that does not
    /// fit fails with [`ProtocolError::Type`].
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        write_b_varchar(buf, "parameter name", &self.name)?;
        buf.put_u8(self.flags.encode());
        self.type_info.encode(buf);
        encode_value(&self.type_info, &self.value, buf)?;
        Ok(())
    }
}

/// Procedure reference of an RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcName {
    /// Called by name.
    Named(String),
    /// Called by built-in id.
    Id(ProcId),
}

/// RPC request builder.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    proc: ProcName,
    options: RpcOptionFlags,
    params: Vec<RpcParam>,
}

impl RpcRequest {
    /// Create a new RPC request for a named procedure.
    pub fn named(proc_name: impl Into<String>) -> Self {
        Self {
            proc: ProcName::Named(proc_name.into()),
            options: RpcOptionFlags::default(),
            params: Vec::new(),
        }
    }

    /// Create a new RPC request for a well-known procedure.
    #[must_use]
    pub fn by_id(proc_id: ProcId) -> Self {
        Self {
            proc: ProcName::Id(proc_id),
            options: RpcOptionFlags::default(),
            params: Vec::new(),
        }
    }

    /// Create an sp_executesql request.
    ///
    /// Positional parameters are named `@p1`, `@p2`, ... and a declaration
    /// list is generated from their types.
    ///
    /// ```
    /// use tds_protocol::rpc::{RpcParam, RpcRequest};
    ///
    /// let rpc = RpcRequest::execute_sql(
    ///     "SELECT * FROM users WHERE id = @p1 AND name = @p2",
    ///     vec![RpcParam::from_value("", 42i32), RpcParam::nvarchar("", "Alice")],
    /// );
    /// assert_eq!(rpc.params().len(), 4);
    /// ```
    pub fn execute_sql(sql: &str, params: Vec<RpcParam>) -> Self {
        let mut request = Self::by_id(ProcId::ExecuteSql);
        request.params.push(RpcParam::nvarchar("", sql));

        let params: Vec<RpcParam> = params
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                if p.name.is_empty() {
                    p.name = format!("@p{}", i + 1);
                } else if !p.name.starts_with('@') {
                    p.name.insert(0, '@');
                }
                p
            })
            .collect();

        if !params.is_empty() {
            let declarations = params
                .iter()
                .map(|p| {
                    let output = if p.flags.by_ref { " output" } else { "" };
                    format!("{} {}{output}", p.name, p.type_info.declaration())
                })
                .collect::<Vec<_>>()
                .join(", ");
            request.params.push(RpcParam::nvarchar("", &declarations));
        }

        request.params.extend(params);
        request
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Parameters in call order.
    #[must_use]
    pub fn params(&self) -> &[RpcParam] {
        &self.params
    }

    /// The procedure being called.
    #[must_use]
    pub fn proc_name(&self) -> &ProcName {
        &self.proc
    }

    /// Encode the request payload.
    ///
    /// Every parameter is encoded before anything is returned, so a value
    /// that does not fit its type fails the whole request.
    pub fn encode(&self, transaction_descriptor: u64) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(128);
        write_all_headers(&mut buf, transaction_descriptor);

        match &self.proc {
            ProcName::Named(name) => write_us_varchar(&mut buf, "procedure name", name)?,
            ProcName::Id(id) => {
                buf.put_u16_le(PROC_ID_SWITCH);
                buf.put_u16_le(*id as u16);
            }
        }
        buf.put_u16_le(self.options.encode());

        for param in &self.params {
            param.encode(&mut buf)?;
        }

        Ok(buf.freeze())
    }
}
