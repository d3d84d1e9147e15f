mod config;
mod diagnostic;
mod report;
mod verify;

pub use config::{VerificationLevel, VerifierConfig};
pub use diagnostic::{Diagnostic, DiagnosticCode, Location, Note, Severity};
pub use report::VerificationReport;
pub use verify::{verify_code, verify_code_or_panic};

#[macro_export]
macro_rules! debug_verify_code {
    ($code:expr) => {{
        if cfg!(debug_assertions) || cfg!(feature = "verify-ir") {
            let cfg = $crate::VerifierConfig::for_level($crate::VerificationLevel::Full);
            $crate::verify_code_or_panic($code, &cfg);
        }
    }};
}
