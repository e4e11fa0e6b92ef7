//! Command framing: instruction token plus ordered key/value parameters.
//!
//! Wire grammar: `<INSTRUCTION> [<KEY><NUMBER>]*`, space separated, e.g.
//! `M20 G90 G0 X202 Y0 Z181 F2000`. Keys are single uppercase letters; a
//! parameter whose value is unset is omitted entirely, never sent empty.
//!
//! Variable-set commands use the grammar `$<digits>=<digits>(.<digits>)?` and
//! are validated before any transport I/O occurs.

use std::fmt;

use crate::error::{ClientError, Result};

/// A numeric parameter value. Integers print without a decimal point, floats
/// print in their shortest form (`202.5` → `202.5`, `202.0` → `202`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Int(v) => write!(f, "{v}"),
            Param::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::Int(i64::from(v))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

/// An instruction plus its ordered parameter list. Immutable once built —
/// the builder methods consume and return `self`, and there are no mutators.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    instruction: String,
    params: Vec<(char, Param)>,
    variable: bool,
}

impl Command {
    /// A command with no parameters yet, e.g. `Command::new("M20 G90 G0")`.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            params: Vec::new(),
            variable: false,
        }
    }

    /// Append one parameter. Keys keep their insertion order on the wire.
    pub fn param(mut self, key: char, value: impl Into<Param>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    /// Append a parameter only if a value is present. Unset parameters leave
    /// no trace on the wire.
    pub fn param_opt(mut self, key: char, value: Option<impl Into<Param>>) -> Self {
        if let Some(v) = value {
            self.params.push((key, v.into()));
        }
        self
    }

    /// A variable assignment `$<index>=<value>`, e.g. `$20=1`.
    pub fn assign(index: u32, value: impl Into<Param>) -> Self {
        Self {
            instruction: format!("${}={}", index, value.into()),
            params: Vec::new(),
            variable: true,
        }
    }

    /// A raw line flagged as a variable command. Grammar is checked by
    /// [`Command::validate`] before dispatch; malformed text fails there
    /// without touching the transport.
    pub fn raw_variable(text: impl Into<String>) -> Self {
        Self {
            instruction: text.into(),
            params: Vec::new(),
            variable: true,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.variable
    }

    /// The wire form, without a line terminator.
    pub fn wire(&self) -> String {
        let mut out = self.instruction.clone();
        for (key, value) in &self.params {
            out.push(' ');
            out.push(*key);
            out.push_str(&value.to_string());
        }
        out
    }

    /// Validate a variable command against `$<digits>=<digits>(.<digits>)?`.
    /// Non-variable commands always pass.
    pub fn validate(&self) -> Result<()> {
        if !self.variable {
            return Ok(());
        }
        let wire = self.wire();
        if is_variable_grammar(&wire) {
            Ok(())
        } else {
            Err(ClientError::BadVariableCommand(wire))
        }
    }
}

fn is_variable_grammar(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('$') else {
        return false;
    };
    let Some((index, value)) = rest.split_once('=') else {
        return false;
    };
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (int_part, frac) = match value.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (value, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match frac {
        None => true,
        Some(f) => !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()),
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_with_params() {
        let cmd = Command::new("M20 G90 G0")
            .param('X', 202.0)
            .param('Y', 0.0)
            .param('Z', 181.0)
            .param('F', 2000u32);
        assert_eq!(cmd.wire(), "M20 G90 G0 X202 Y0 Z181 F2000");
    }

    #[test]
    fn unset_params_leave_no_trace() {
        let cmd = Command::new("M21 G90")
            .param_opt('X', Some(10.5))
            .param_opt('Y', None::<f64>)
            .param_opt('Z', None::<f64>)
            .param('F', 2000u32);
        let wire = cmd.wire();
        assert_eq!(wire, "M21 G90 X10.5 F2000");
        assert!(!wire.contains('Y'));
        assert!(!wire.contains('Z'));
    }

    #[test]
    fn bare_instruction() {
        assert_eq!(Command::new("$H").wire(), "$H");
        assert_eq!(Command::new("M50").wire(), "M50");
    }

    #[test]
    fn assign_is_valid_variable() {
        let cmd = Command::assign(20, 1i64);
        assert!(cmd.is_variable());
        assert_eq!(cmd.wire(), "$20=1");
        cmd.validate().unwrap();

        Command::assign(41, 1.5).validate().unwrap();
    }

    #[test]
    fn raw_variable_grammar() {
        Command::raw_variable("$102=370.0").validate().unwrap();
        for bad in ["$20=", "$=1", "20=1", "$20=1.2.3", "$20=abc", "$20=1.", "$a=1"] {
            let err = Command::raw_variable(bad).validate().unwrap_err();
            assert!(
                matches!(err, ClientError::BadVariableCommand(_)),
                "{bad} should fail grammar"
            );
        }
    }
}
