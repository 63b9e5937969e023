//! Location/language metadata collaborator

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleInfo {
    pub language: String,
    pub region: String,
}

impl Default for LocaleInfo {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            region: "unknown".to_string(),
        }
    }
}

/// Looks up language/location metadata for a joining participant.
/// Failures here are non-fatal; the caller applies defaults.
#[async_trait]
pub trait LocaleLookup: Send + Sync {
    async fn locale_for(&self, user_id: &str) -> Result<LocaleInfo>;
}

/// Fixed-locale lookup used as the default and in tests
pub struct StaticLocaleLookup {
    locale: LocaleInfo,
}

impl StaticLocaleLookup {
    pub fn new(language: &str, region: &str) -> Self {
        Self {
            locale: LocaleInfo {
                language: language.to_string(),
                region: region.to_string(),
            },
        }
    }
}

impl Default for StaticLocaleLookup {
    fn default() -> Self {
        Self {
            locale: LocaleInfo::default(),
        }
    }
}

#[async_trait]
impl LocaleLookup for StaticLocaleLookup {
    async fn locale_for(&self, _user_id: &str) -> Result<LocaleInfo> {
        Ok(self.locale.clone())
    }
}
