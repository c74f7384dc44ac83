//! AWS error classification
//!
//! CloudFormation reports most conditions as a generic `ValidationError`
//! with a descriptive message, so classification looks at the message as
//! well as the `.code()`.

use aws_sdk_cloudformation::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::operation::{
    create_stack::CreateStackError, delete_stack::DeleteStackError,
    describe_stacks::DescribeStacksError, update_stack::UpdateStackError,
};
use thiserror::Error;

/// AWS error categories for retry and control-flow decisions
#[derive(Debug, Error)]
pub enum AwsError {
    /// The stack (or other resource) does not exist
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// A stack with this name already exists
    #[error("Stack already exists")]
    AlreadyExists,

    /// The submitted template and parameters match the deployed stack
    #[error("No updates are to be performed")]
    NoUpdates,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }

    pub fn is_no_updates(&self) -> bool {
        matches!(self, AwsError::NoUpdates)
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            AwsError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            _ => None,
        }
    }
}

const ALREADY_EXISTS_CODES: &[&str] = &["AlreadyExistsException"];

const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

/// CloudFormation reports a missing stack as
/// `ValidationError: Stack with id <name> does not exist`
const VALIDATION_ERROR_CODE: &str = "ValidationError";

const MISSING_STACK_PREFIX: &str = "Stack with id ";

const MISSING_STACK_SUFFIX: &str = "does not exist";

fn is_missing_stack(code: Option<&str>, message: &str) -> bool {
    code == Some(VALIDATION_ERROR_CODE)
        && message.starts_with(MISSING_STACK_PREFIX)
        && message.trim_end_matches('.').ends_with(MISSING_STACK_SUFFIX)
}

/// Classify an AWS error from its code and message.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        _ if message.contains(NO_UPDATES_MESSAGE) => AwsError::NoUpdates,
        _ if is_missing_stack(code, &message) => AwsError::NotFound {
            resource_type: "stack",
            resource_id: message.clone(),
        },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK error that carries error metadata.
pub fn classify_sdk_error<E: ProvideErrorMetadata>(error: &E) -> AwsError {
    classify_aws_error(error.code(), error.message())
}

/// Classify an `anyhow::Error` by walking its chain for a CloudFormation
/// operation error.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<SdkError<DescribeStacksError>>() {
            return classify_sdk_error(e);
        }
        if let Some(e) = cause.downcast_ref::<SdkError<CreateStackError>>() {
            return classify_sdk_error(e);
        }
        if let Some(e) = cause.downcast_ref::<SdkError<UpdateStackError>>() {
            return classify_sdk_error(e);
        }
        if let Some(e) = cause.downcast_ref::<SdkError<DeleteStackError>>() {
            return classify_sdk_error(e);
        }
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "InsufficientCapabilitiesException",
        "The template creates IAM resources; deploy with CAPABILITY_IAM.",
    ),
    (
        "LimitExceededException",
        "Request a CloudFormation stack limit increase via AWS Service Quotas.",
    ),
    (
        "ExpiredToken",
        "AWS credentials have expired. Refresh them or pick another --aws-profile.",
    ),
    (
        "AccessDenied",
        "The caller lacks CloudFormation permissions in this account or region.",
    ),
];

fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
