#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationLevel {
    Fast,
    Standard,
    Full,
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub level: VerificationLevel,
    pub max_diagnostics: usize,
    pub allow_unreachable_blocks: bool,
    pub check_users: bool,
    pub check_phis: bool,
}

impl VerifierConfig {
    pub fn for_level(level: VerificationLevel) -> Self {
        match level {
            VerificationLevel::Fast => Self {
                level,
                max_diagnostics: 200,
                allow_unreachable_blocks: true,
                check_users: false,
                check_phis: false,
            },
            VerificationLevel::Standard => Self {
                level,
                max_diagnostics: 200,
                allow_unreachable_blocks: true,
                check_users: false,
                check_phis: true,
            },
            VerificationLevel::Full => Self {
                level,
                max_diagnostics: 500,
                allow_unreachable_blocks: false,
                check_users: true,
                check_phis: true,
            },
        }
    }

    /// Block ends, successor counts and throwing instruction placement.
    pub fn should_check_instructions(&self) -> bool {
        !matches!(self.level, VerificationLevel::Fast)
    }

    pub fn should_check_phis(&self) -> bool {
        self.check_phis || matches!(self.level, VerificationLevel::Full)
    }

    pub fn should_check_users(&self) -> bool {
        self.check_users || matches!(self.level, VerificationLevel::Full)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::for_level(VerificationLevel::Standard)
    }
}
