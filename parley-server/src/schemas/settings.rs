use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct SettingsRequest {
    /// System-prompt preamble; empty clears it.
    #[serde(default)]
    #[validate(length(max = 32768))]
    pub custom_instructions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettingsResponse {
    pub custom_instructions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettingsUpdatedResponse {
    pub message: String,
    pub custom_instructions: String,
}
