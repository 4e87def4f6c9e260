pub mod builtin;
pub mod engine;
pub mod filter;
pub mod finding;
pub mod processors;
pub mod severity;
pub mod store;
pub mod template;

pub use builtin::load_builtin_templates;
pub use engine::{compile_processors, run_diagnostics};
pub use finding::{DiagnosticFinding, DiagnosticRunResponse, ReportKey};
pub use severity::Severity;
pub use store::{StoreError, TemplateStore};
pub use template::{
    normalize_template, DetectorTemplate, DiagnosticTemplate, TemplateCondition, TemplateFilter,
};
