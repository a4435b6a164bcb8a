//! The immutable description of *what* an analysis job computes.

use serde::Serialize;

use crate::error::CoreError;
use crate::subject::SubjectKey;

/// Maximum length of a business-type or weighting override.
pub const MAX_OVERRIDE_LENGTH: usize = 64;

/// A request to analyse one subject.
///
/// Constructed via [`JobRequest::new`] and refined with the builder
/// methods [`with_business_type`](JobRequest::with_business_type),
/// [`with_weighting`](JobRequest::with_weighting) and
/// [`force_refresh`](JobRequest::force_refresh).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    subject: SubjectKey,
    overrides: AnalysisOverrides,
}

/// Optional parameters forwarded to the valuation engine.
///
/// Serialised as the JSON body of the poll-transport start call and as
/// query parameters for the stream and direct endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisOverrides {
    /// Business classification override (e.g. `"bank"`, `"reit"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_type: Option<String>,
    /// Valuation-model weighting scheme override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighting: Option<String>,
    /// Bypass any cached result on the server.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force_refresh: bool,
}

impl JobRequest {
    pub fn new(subject: SubjectKey) -> Self {
        Self {
            subject,
            overrides: AnalysisOverrides::default(),
        }
    }

    /// Parse the ticker and build a request with no overrides.
    pub fn for_ticker(ticker: &str) -> Result<Self, CoreError> {
        Ok(Self::new(SubjectKey::parse(ticker)?))
    }

    pub fn with_business_type(
        mut self,
        business_type: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let value = validate_override("business type", business_type.into())?;
        self.overrides.business_type = Some(value);
        Ok(self)
    }

    pub fn with_weighting(mut self, weighting: impl Into<String>) -> Result<Self, CoreError> {
        let value = validate_override("weighting", weighting.into())?;
        self.overrides.weighting = Some(value);
        Ok(self)
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.overrides.force_refresh = force;
        self
    }

    /// The job slot this request occupies.
    pub fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    pub fn overrides(&self) -> &AnalysisOverrides {
        &self.overrides
    }

    /// Overrides as `(name, value)` query pairs, omitting unset ones.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(ref business_type) = self.overrides.business_type {
            pairs.push(("business_type", business_type.clone()));
        }
        if let Some(ref weighting) = self.overrides.weighting {
            pairs.push(("weighting", weighting.clone()));
        }
        if self.overrides.force_refresh {
            pairs.push(("force_refresh", "true".to_string()));
        }
        pairs
    }
}

fn validate_override(field: &str, value: String) -> Result<String, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.len() > MAX_OVERRIDE_LENGTH {
        return Err(CoreError::Validation(format!(
            "{field} exceeds maximum length of {MAX_OVERRIDE_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}
