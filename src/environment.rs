use serde::{Deserialize, Serialize};

/// KSeF environment. Selection is immutable for the lifetime of a client
/// instance; each environment maps to its own base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Integration test environment (self-registration, synthetic NIPs).
    Test,
    /// Pre-production demo environment.
    Demo,
    /// Production.
    Production,
}

impl Environment {
    /// API base URL for this environment.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Test => "https://ksef-test.mf.gov.pl/api",
            Self::Demo => "https://ksef-demo.mf.gov.pl/api",
            Self::Production => "https://ksef.mf.gov.pl/api",
        }
    }

    /// Short name used in error context and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Demo => "demo",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_are_https_and_distinct() {
        let envs = [Environment::Test, Environment::Demo, Environment::Production];
        for e in envs {
            assert!(e.base_url().starts_with("https://"));
        }
        assert_ne!(Environment::Test.base_url(), Environment::Production.base_url());
    }
}
