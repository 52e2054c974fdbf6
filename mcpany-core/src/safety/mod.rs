//! Command-substitution security analysis.
//!
//! The analyzer decides, for each user-supplied value, whether substituting
//! it into an argv template is safe given the quoting context, the invoking
//! command, and the interpreter that will see the result. See
//! [`injection::CommandAnalyzer`] for the per-value pipeline.

pub mod injection;
pub mod interpreter;
pub mod quote;
pub mod traversal;

pub use injection::CommandAnalyzer;
pub use interpreter::{detect_interpreter, normalize_base, requires_strict_checks, Interpreter};
pub use quote::{analyze_quote_context, QuoteLevel};
pub use traversal::{check_absolute_path, check_flag_smuggling, check_scheme, check_traversal};
