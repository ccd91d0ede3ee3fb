//! Script-level faults and their traceback rendering.

use std::fmt;

/// Classification of a fault raised while running script code.
///
/// The `name()` of a kind is what scripts match against in `except` clauses
/// and what appears in the formatted result string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    Syntax,
    Name,
    Type,
    Value,
    ZeroDivision,
    Index,
    Key,
    Attribute,
    Import,
    Overflow,
    Memory,
    Recursion,
    Os,
    Runtime,
    /// A disallowed import or builtin reference.
    PolicyViolation,
    /// The run was cancelled after its deadline. Never catchable by scripts.
    Cancelled,
    /// Raised by `raise` with a user-chosen name, or by a tool.
    Custom(String),
}

impl FaultKind {
    pub fn name(&self) -> &str {
        match self {
            FaultKind::Syntax => "SyntaxError",
            FaultKind::Name => "NameError",
            FaultKind::Type => "TypeError",
            FaultKind::Value => "ValueError",
            FaultKind::ZeroDivision => "ZeroDivisionError",
            FaultKind::Index => "IndexError",
            FaultKind::Key => "KeyError",
            FaultKind::Attribute => "AttributeError",
            FaultKind::Import => "ImportError",
            FaultKind::Overflow => "OverflowError",
            FaultKind::Memory => "MemoryError",
            FaultKind::Recursion => "RecursionError",
            FaultKind::Os => "OSError",
            FaultKind::Runtime => "RuntimeError",
            FaultKind::PolicyViolation => "PolicyViolation",
            FaultKind::Cancelled => "Cancelled",
            FaultKind::Custom(name) => name,
        }
    }

    /// Map an exception name back to a kind, so `raise ValueError(...)` and
    /// an internally produced value error are the same thing.
    pub fn from_name(name: &str) -> Self {
        match name {
            "SyntaxError" => FaultKind::Syntax,
            "NameError" => FaultKind::Name,
            "TypeError" => FaultKind::Type,
            "ValueError" => FaultKind::Value,
            "ZeroDivisionError" => FaultKind::ZeroDivision,
            "IndexError" => FaultKind::Index,
            "KeyError" => FaultKind::Key,
            "AttributeError" => FaultKind::Attribute,
            "ImportError" | "ModuleNotFoundError" => FaultKind::Import,
            "OverflowError" => FaultKind::Overflow,
            "MemoryError" => FaultKind::Memory,
            "RecursionError" => FaultKind::Recursion,
            "OSError" => FaultKind::Os,
            "RuntimeError" => FaultKind::Runtime,
            "PolicyViolation" => FaultKind::PolicyViolation,
            other => FaultKind::Custom(other.to_string()),
        }
    }

    /// Whether an `except` clause naming `handler` catches this kind.
    pub fn matches(&self, handler: &str) -> bool {
        if !self.is_catchable() {
            return false;
        }
        match handler {
            "Exception" | "BaseException" => true,
            "LookupError" => matches!(self, FaultKind::Index | FaultKind::Key),
            "ArithmeticError" => matches!(self, FaultKind::ZeroDivision | FaultKind::Overflow),
            "ModuleNotFoundError" => *self == FaultKind::Import,
            other => self.name() == other,
        }
    }

    pub fn is_catchable(&self) -> bool {
        !matches!(self, FaultKind::Cancelled)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One line of a traceback: the frame's function name and the line it was on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub function: String,
    pub line: usize,
}

/// A fault raised by script code, carrying the call stack active when it was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub traceback: Vec<TraceEntry>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        let mut fault = Self::new(FaultKind::Syntax, message);
        fault.traceback.push(TraceEntry {
            function: "<module>".to_string(),
            line,
        });
        fault
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(FaultKind::Name, format!("name '{name}' is not defined"))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Value, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FaultKind::Cancelled, "execution cancelled after deadline")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FaultKind::Cancelled
    }

    /// Render the fault the way the result string reports it:
    /// a summary line, then the traceback, then the summary again.
    pub fn render(&self, filename: &str) -> String {
        let mut out = format!("Error: {}: {}\n", self.kind, self.message);
        out.push_str("Traceback (most recent call last):\n");
        for entry in &self.traceback {
            out.push_str(&format!(
                "  File \"{filename}\", line {}, in {}\n",
                entry.line, entry.function
            ));
        }
        out.push_str(&format!("{}: {}\n", self.kind, self.message));
        out
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

pub type ScriptResult<T> = std::result::Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in [
            FaultKind::Name,
            FaultKind::Type,
            FaultKind::ZeroDivision,
            FaultKind::PolicyViolation,
        ] {
            assert_eq!(FaultKind::from_name(kind.name()), kind);
        }
        assert_eq!(
            FaultKind::from_name("DeviceError"),
            FaultKind::Custom("DeviceError".into())
        );
    }

    #[test]
    fn test_exception_catches_everything_but_cancellation() {
        assert!(FaultKind::Value.matches("Exception"));
        assert!(FaultKind::Custom("DeviceError".into()).matches("Exception"));
        assert!(FaultKind::Key.matches("LookupError"));
        assert!(!FaultKind::Cancelled.matches("Exception"));
        assert!(!FaultKind::Cancelled.matches("BaseException"));
    }

    #[test]
    fn test_render_includes_kind_message_and_frames() {
        let mut fault = Fault::new(FaultKind::ZeroDivision, "division by zero");
        fault.traceback = vec![
            TraceEntry {
                function: "<module>".into(),
                line: 3,
            },
            TraceEntry {
                function: "ratio".into(),
                line: 2,
            },
        ];
        let text = fault.render("<code>");
        assert!(text.starts_with("Error: ZeroDivisionError: division by zero\n"));
        assert!(text.contains("File \"<code>\", line 3, in <module>"));
        assert!(text.contains("File \"<code>\", line 2, in ratio"));
        assert!(text.ends_with("ZeroDivisionError: division by zero\n"));
    }
}
