use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enforcement posture for a deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceMode {
    /// No constraints; local testing only.
    Development,
    /// Deterministic routing required; WAL signing optional.
    #[default]
    Standard,
    /// Deterministic routing, signed WAL, and a PII redaction policy are
    /// all mandatory.
    Regulated,
}

impl std::fmt::Display for ComplianceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComplianceMode::Development => "development",
            ComplianceMode::Standard => "standard",
            ComplianceMode::Regulated => "regulated",
        };
        f.write_str(s)
    }
}

/// Requirements derived from a compliance mode, validated at router
/// initialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceConfig {
    pub mode: ComplianceMode,
    pub require_signed_wal: bool,
    pub require_determinism: bool,
    pub require_pii_policy: bool,
}

impl ComplianceConfig {
    pub fn for_mode(mode: ComplianceMode) -> Self {
        match mode {
            ComplianceMode::Development => Self {
                mode,
                require_signed_wal: false,
                require_determinism: false,
                require_pii_policy: false,
            },
            ComplianceMode::Standard => Self {
                mode,
                require_signed_wal: false,
                require_determinism: true,
                require_pii_policy: false,
            },
            ComplianceMode::Regulated => Self {
                mode,
                require_signed_wal: true,
                require_determinism: true,
                require_pii_policy: true,
            },
        }
    }

    /// Check internal consistency. A REGULATED config that has been
    /// loosened by hand fails here with an explicit diagnostic.
    pub fn validate(&self) -> Result<(), ComplianceError> {
        if self.mode == ComplianceMode::Regulated {
            if !self.require_signed_wal {
                return Err(ComplianceError::MissingRequirement {
                    mode: self.mode,
                    requirement: "signed WAL entries",
                });
            }
            if !self.require_determinism {
                return Err(ComplianceError::MissingRequirement {
                    mode: self.mode,
                    requirement: "deterministic routing",
                });
            }
            if !self.require_pii_policy {
                return Err(ComplianceError::MissingRequirement {
                    mode: self.mode,
                    requirement: "a PII redaction policy",
                });
            }
        }
        Ok(())
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self::for_mode(ComplianceMode::Standard)
    }
}

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("compliance mode '{mode}' requires {requirement}, which is not configured")]
    MissingRequirement {
        mode: ComplianceMode,
        requirement: &'static str,
    },

    #[error("compliance mode '{mode}' requires a WAL signer, but none was provided")]
    SignerRequired { mode: ComplianceMode },

    #[error("compliance mode '{mode}' requires a PII redaction policy, but none was configured")]
    PiiPolicyRequired { mode: ComplianceMode },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_presets_match_enforcement_table() {
        let dev = ComplianceConfig::for_mode(ComplianceMode::Development);
        assert!(!dev.require_determinism);
        assert!(!dev.require_signed_wal);

        let std = ComplianceConfig::for_mode(ComplianceMode::Standard);
        assert!(std.require_determinism);
        assert!(!std.require_signed_wal);

        let reg = ComplianceConfig::for_mode(ComplianceMode::Regulated);
        assert!(reg.require_determinism);
        assert!(reg.require_signed_wal);
        assert!(reg.require_pii_policy);
    }

    #[test]
    fn loosened_regulated_config_fails_validation() {
        let mut config = ComplianceConfig::for_mode(ComplianceMode::Regulated);
        config.require_signed_wal = false;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signed WAL"));
    }

    #[test]
    fn presets_validate() {
        for mode in [
            ComplianceMode::Development,
            ComplianceMode::Standard,
            ComplianceMode::Regulated,
        ] {
            assert!(ComplianceConfig::for_mode(mode).validate().is_ok());
        }
    }
}
