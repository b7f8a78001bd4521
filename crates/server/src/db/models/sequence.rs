/// 序列计数器 DTO

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSequenceDto {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub start: u64,
    #[validate(range(min = 1))]
    pub step: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceValueResponse {
    pub name: String,
    pub value: u64,
}
